use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use concierge::system::{RealSystem, RealUser};
use nix::unistd::{getgid, getuid};
use tempfile::TempDir;

/// Creates a temporary directory and returns it with its UTF-8 path.
#[allow(dead_code)]
pub fn utf8_tempdir() -> (TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("tempdir is not UTF-8");
    (dir, path)
}

/// The current process user, with `home` standing in for the home directory.
#[allow(dead_code)]
pub fn test_user(home: &Utf8Path) -> RealUser {
    RealUser {
        name: "concierge-test".to_string(),
        uid: getuid().as_raw(),
        gid: getgid().as_raw(),
        home: home.to_owned(),
    }
}

/// A real system acting for [`test_user`], with a short retry backoff.
#[allow(dead_code)]
pub fn test_system(home: &Utf8Path) -> RealSystem {
    RealSystem::with_user(test_user(home), false).with_initial_backoff(Duration::from_millis(50))
}

/// Clonable in-memory writer for capturing dry-run output.
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

#[allow(dead_code)]
impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
