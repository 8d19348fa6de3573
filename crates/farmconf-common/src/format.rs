//! Reserved names of the configuration document format.
//!
//! A source document looks like
//!
//! ```json
//! {
//!   "Modules": {
//!     "HttpClient": {
//!       "timeout": "15 s",
//!       "_Sets_Type_": "COLO",
//!       "_Sets_": [{ "key": ["323"], "keyList": { "timeout": "2 s" } }]
//!     }
//!   },
//!   "lsgclient": { "farm1": { "timeout": "3 s" } }
//! }
//! ```

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Section holding the modules shared by every application.
pub const MODULES: &str = "Modules";

/// Array of context-scoped override entries.
pub const SETS: &str = "_Sets_";

/// Name of the context key the override entries are matched against.
pub const SETS_TYPE: &str = "_Sets_Type_";

/// Identifier list of one override entry.
pub const SET_KEY: &str = "key";

/// Attribute map of one override entry.
pub const SET_KEY_LIST: &str = "keyList";

/// Explicit block of unscoped defaults.
pub const DEFAULTS: &str = "_Defs_";

/// Name of the index document listing the source files.
pub const INDEX_FILE: &str = "config_file_list.json";

/// Field of the index document holding the file names.
pub const INDEX_FILES: &str = "files";

/// Set type used for farm-scoped overrides.
pub const FARM_SETS_TYPE: &str = "FARM";

/// Returns true if `key` is one of the reserved module keys.
pub fn is_reserved(key: &str) -> bool {
    matches!(key, SETS | SETS_TYPE | DEFAULTS)
}

/// Hex encoded SHA-256 of the canonical JSON text of `value`.
///
/// `serde_json` keeps object keys sorted, so equal documents hash equal
/// regardless of the key order they were written in.
pub fn content_hash(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
