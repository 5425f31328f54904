//! Local and remote path descriptors.
//!
//! Sources and the destination are either plain filesystem paths or
//! `user@host:path` descriptors reached over ssh. The parser follows the
//! usual rsync/scp convention: a string is remote when everything before
//! the first `:` looks like an optional user plus a hostname.

use std::path::{Path, PathBuf};

/// One side of a transfer: a local path or a remote `user@host:path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Local(PathBuf),
    Remote {
        user: Option<String>,
        host: String,
        path: String,
    },
}

fn valid_user(user: &str) -> bool {
    !user.is_empty()
        && user
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._%+-".contains(c))
}

fn valid_host(host: &str) -> bool {
    !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || ".-".contains(c))
}

impl Endpoint {
    /// Parse a path descriptor. Strings that contain a `:` but whose prefix
    /// is not a plausible `[user@]host` (e.g. `./odd:file`) stay local.
    pub fn parse(raw: &str) -> Self {
        if let Some((head, path)) = raw.split_once(':') {
            if !path.is_empty() {
                let (user, host) = match head.split_once('@') {
                    Some((user, host)) => (Some(user), host),
                    None => (None, head),
                };
                if user.map_or(true, valid_user) && valid_host(host) {
                    return Endpoint::Remote {
                        user: user.map(str::to_owned),
                        host: host.to_owned(),
                        path: path.to_owned(),
                    };
                }
            }
        }
        Endpoint::Local(PathBuf::from(raw))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Endpoint::Remote { .. })
    }

    /// The `[user@]host` string handed to ssh, for remote endpoints.
    pub fn ssh_target(&self) -> Option<String> {
        match self {
            Endpoint::Local(_) => None,
            Endpoint::Remote { user, host, .. } => Some(match user {
                Some(user) => format!("{user}@{host}"),
                None => host.clone(),
            }),
        }
    }

    /// The path component, local or remote.
    pub fn path(&self) -> &Path {
        match self {
            Endpoint::Local(path) => path,
            Endpoint::Remote { path, .. } => Path::new(path),
        }
    }

    /// Endpoint for a name underneath this one.
    pub fn join(&self, name: &str) -> Endpoint {
        match self {
            Endpoint::Local(path) => Endpoint::Local(path.join(name)),
            Endpoint::Remote { user, host, path } => Endpoint::Remote {
                user: user.clone(),
                host: host.clone(),
                path: format!("{}/{name}", path.trim_end_matches('/')),
            },
        }
    }

    /// The form rsync understands: `user@host:path` or the bare path.
    pub fn rsync_arg(&self) -> String {
        match self {
            Endpoint::Local(path) => path.display().to_string(),
            Endpoint::Remote { path, .. } => {
                format!("{}:{path}", self.ssh_target().unwrap_or_default())
            }
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.rsync_arg())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_user_host_path() {
        let ep = Endpoint::parse("alice@backup.example.org:/srv/backups");
        assert_eq!(
            ep,
            Endpoint::Remote {
                user: Some("alice".into()),
                host: "backup.example.org".into(),
                path: "/srv/backups".into(),
            }
        );
        assert_eq!(ep.ssh_target().as_deref(), Some("alice@backup.example.org"));
        assert_eq!(ep.rsync_arg(), "alice@backup.example.org:/srv/backups");
    }

    #[test]
    fn parses_host_only() {
        let ep = Endpoint::parse("nas:/volume1/tm");
        assert_eq!(
            ep,
            Endpoint::Remote {
                user: None,
                host: "nas".into(),
                path: "/volume1/tm".into(),
            }
        );
        assert_eq!(ep.ssh_target().as_deref(), Some("nas"));
    }

    #[test]
    fn plain_paths_stay_local() {
        assert_eq!(Endpoint::parse("/var/backups"), Endpoint::Local("/var/backups".into()));
        assert_eq!(Endpoint::parse("relative/dir"), Endpoint::Local("relative/dir".into()));
    }

    #[test]
    fn odd_colons_stay_local() {
        // The prefix contains '/', which no hostname has.
        assert_eq!(Endpoint::parse("./odd:file"), Endpoint::Local("./odd:file".into()));
        // Empty path after the colon is not a remote spec either.
        assert_eq!(Endpoint::parse("host:"), Endpoint::Local("host:".into()));
    }

    #[test]
    fn join_appends_a_component() {
        let local = Endpoint::parse("/srv/backups").join("2026-08-30_14:02:51_GMT");
        assert_eq!(local.rsync_arg(), "/srv/backups/2026-08-30_14:02:51_GMT");

        let remote = Endpoint::parse("nas:/volume1/tm/").join("latest");
        assert_eq!(remote.rsync_arg(), "nas:/volume1/tm/latest");
    }
}
