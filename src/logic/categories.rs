//! Behavioral syscall categories
//!
//! The five fixed categories the extraction and scoring stages operate on.
//! Declaration order matters: verdict tie-breaking preserves it.

use serde::{Deserialize, Serialize};

/// One of the five behavioral syscall groupings
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    DeviceManagement,
    FileSystem,
    ProcessControl,
    MemoryManagement,
    InterprocessCommunication,
}

impl Category {
    /// All categories, in declaration order
    pub const ALL: [Category; 5] = [
        Category::DeviceManagement,
        Category::FileSystem,
        Category::ProcessControl,
        Category::MemoryManagement,
        Category::InterprocessCommunication,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::DeviceManagement => "device_management",
            Category::FileSystem => "file_system",
            Category::ProcessControl => "process_control",
            Category::MemoryManagement => "memory_management",
            Category::InterprocessCommunication => "interprocess_communication",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declaration_order() {
        assert_eq!(Category::ALL[0], Category::DeviceManagement);
        assert_eq!(Category::ALL[4], Category::InterprocessCommunication);
        assert!(Category::DeviceManagement < Category::FileSystem);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Category::InterprocessCommunication).unwrap();
        assert_eq!(json, "\"interprocess_communication\"");

        let cat: Category = serde_json::from_str("\"file_system\"").unwrap();
        assert_eq!(cat, Category::FileSystem);
    }
}
