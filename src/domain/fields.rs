//! Well-known Result Store field names and report categories.
//!
//! Field names double as the keys the assembler looks up, so a unit that
//! wants its output to land in the report publishes under these names.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A named group of fields assembled into one report sub-tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    BasicInfo,
    System,
    Hardware,
    Security,
    Network,
}

impl Category {
    /// All categories in report order
    pub const ALL: [Category; 5] = [
        Category::BasicInfo,
        Category::System,
        Category::Hardware,
        Category::Security,
        Category::Network,
    ];
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BasicInfo => "BasicInfo",
            Self::System => "System",
            Self::Hardware => "Hardware",
            Self::Security => "Security",
            Self::Network => "Network",
        };
        f.write_str(label)
    }
}

// BasicInfo
pub const OS: &str = "Os";
pub const HOSTNAME: &str = "Hostname";
pub const USERNAME: &str = "Username";
pub const DOMAIN: &str = "Domain";
pub const BOOT_MODE: &str = "BootMode";
pub const UPTIME: &str = "Uptime";

// System
pub const USER_VARIABLES: &str = "UserVariables";
pub const SYSTEM_VARIABLES: &str = "SystemVariables";
pub const RUNNING_PROCESSES: &str = "RunningProcesses";
pub const STARTUP_TASKS: &str = "StartupTasks";
pub const USERNAME_SPECIAL_CHARACTERS: &str = "UsernameSpecialCharacters";
pub const ONEDRIVE_COMMERCIAL_PATH_LENGTH: &str = "OneDriveCommercialPathLength";
pub const ONEDRIVE_COMMERCIAL_NAME_LENGTH: &str = "OneDriveCommercialNameLength";

// Hardware
pub const CPU: &str = "Cpu";
pub const MEMORY: &str = "Memory";
pub const STORAGE: &str = "Storage";
pub const DRIVERS: &str = "Drivers";

// Security
pub const AV_LIST: &str = "AvList";
pub const FW_LIST: &str = "FwList";
pub const SECURE_BOOT_ENABLED: &str = "SecureBootEnabled";
pub const TPM: &str = "Tpm";

// Network
pub const NET_ADAPTERS: &str = "NetAdapters";
pub const ROUTES: &str = "Routes";
pub const HOSTS_FILE: &str = "HostsFile";
pub const HOSTS_FILE_HASH: &str = "HostsFileHash";

/// Key inside [`USER_VARIABLES`] holding the commercial OneDrive folder
pub const ONEDRIVE_COMMERCIAL_VAR: &str = "OneDriveCommercial";
