//! Resolution of the "real user" behind an elevated invocation.

use camino::Utf8PathBuf;
use nix::unistd::{Uid, User};

use crate::error::ConciergeError;

/// The user concierge provisions for.
///
/// concierge normally runs under `sudo`; home-relative files, group
/// membership and controller bootstrap target the user who invoked `sudo`,
/// not root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealUser {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: Utf8PathBuf,
}

impl RealUser {
    /// Resolves `SUDO_USER` when set, otherwise the current uid.
    pub fn resolve() -> Result<Self, ConciergeError> {
        let sudo_user = std::env::var("SUDO_USER").ok().filter(|name| !name.is_empty());

        let lookup = match &sudo_user {
            Some(name) => User::from_name(name),
            None => User::from_uid(Uid::current()),
        };
        let user = lookup
            .map_err(|e| ConciergeError::io("failed to look up real user", e.into()))?
            .ok_or_else(|| {
                ConciergeError::Config(format!(
                    "real user '{}' does not exist",
                    sudo_user.unwrap_or_else(|| Uid::current().to_string())
                ))
            })?;

        Self::from_passwd(user)
    }

    fn from_passwd(user: User) -> Result<Self, ConciergeError> {
        let home = Utf8PathBuf::from_path_buf(user.dir).map_err(|path| {
            ConciergeError::Config(format!(
                "home directory of '{}' is not valid UTF-8: {}",
                user.name,
                path.display()
            ))
        })?;
        tracing::debug!(user = %user.name, home = %home, "resolved real user");

        Ok(Self {
            name: user.name,
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
            home,
        })
    }
}
