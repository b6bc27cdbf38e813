//! Package reconciliation for snaps and debs.
//!
//! - [`SnapHandler`]: install, refresh or skip each desired snap, then form
//!   its missing connections
//! - [`DebHandler`]: install absent archive packages, purge present ones on
//!   restore

mod deb;
mod snap;

pub use deb::DebHandler;
pub use snap::{SnapAction, SnapHandler, SnapPackage, install_command, plan, refresh_command};
