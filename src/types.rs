/// Shared types used across the codebase

use serde::{Deserialize, Serialize};

/// Write operations; validation rules differ between the two
/// (e.g. the price discount check only runs on create).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Create,
    Update,
}
