//! Target source port (interface).

use crate::domain::SelectedTarget;
use crate::error::Result;

/// Port for reading which chart museum is selected.
pub trait TargetSource {
    /// Returns the selected target record.
    fn current(&self) -> Result<SelectedTarget>;
}
