use std::{fs, num::ParseIntError, path::Path};

use thiserror::Error;

/// A single upstream mapping: requests whose path starts with `prefix` are
/// forwarded to `host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub prefix: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Error)]
pub enum RouteLoadError {
    #[error("failed to read route file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("route file {path} contains no routes")]
    Empty { path: String },
    #[error("{path}:{line_no}: expected 'prefix host port', got '{line}'")]
    Malformed { path: String, line_no: usize, line: String },
    #[error("{path}:{line_no}: invalid port '{value}': {source}")]
    InvalidPort { path: String, line_no: usize, value: String, source: ParseIntError },
}

/// The full set of routes, immutable after load. Matching is first-match
/// over the order the routes appear in the file, not longest-prefix.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Parses `prefix host port` lines from `path`. Blank lines and lines
    /// starting with `#` are ignored. Fails if the file is unreadable,
    /// malformed, or yields zero routes.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RouteLoadError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.display().to_string();
        let contents = fs::read_to_string(path_ref)
            .map_err(|source| RouteLoadError::Read { path: path_str.clone(), source })?;

        let mut routes = Vec::new();
        for (idx, raw_line) in contents.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line.split_whitespace();
            let (Some(prefix), Some(host), Some(port_str), None) =
                (fields.next(), fields.next(), fields.next(), fields.next())
            else {
                return Err(RouteLoadError::Malformed {
                    path: path_str,
                    line_no: idx + 1,
                    line: line.to_owned(),
                });
            };

            let port = port_str.parse::<u16>().map_err(|source| RouteLoadError::InvalidPort {
                path: path_str.clone(),
                line_no: idx + 1,
                value: port_str.to_owned(),
                source,
            })?;

            routes.push(Route { prefix: prefix.to_owned(), host: host.to_owned(), port });
        }

        if routes.is_empty() {
            return Err(RouteLoadError::Empty { path: path_str });
        }

        tracing::info!(count = routes.len(), path = %path_str, "loaded routes");
        Ok(Self { routes })
    }

    /// First route (in file order) whose prefix matches `path`. Not
    /// longest-prefix; an earlier shorter prefix shadows a later longer one.
    pub fn find(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|route| path.starts_with(route.prefix.as_str()))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn write_conf(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_routes_in_order() {
        let file = write_conf(
            "# comment\n/api 127.0.0.1 9001\n\n/web 127.0.0.1 9002\n/ 127.0.0.1 9003\n",
        );
        let table = RouteTable::load(file.path()).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.find("/api/users").unwrap().port, 9001);
        assert_eq!(table.find("/web/home").unwrap().port, 9002);
        assert_eq!(table.find("/anything").unwrap().port, 9003);
    }

    #[test]
    fn first_match_wins_even_if_shorter() {
        let file = write_conf("/ 127.0.0.1 1\n/api 127.0.0.1 2\n");
        let table = RouteTable::load(file.path()).unwrap();
        // "/" is listed first, so it shadows the more specific "/api" route.
        assert_eq!(table.find("/api/users").unwrap().port, 1);
    }

    #[test]
    fn no_match_returns_none() {
        let file = write_conf("/api 127.0.0.1 9001\n");
        let table = RouteTable::load(file.path()).unwrap();
        assert!(table.find("/web").is_none());
    }

    #[test]
    fn empty_file_is_an_error() {
        let file = write_conf("# nothing but comments\n\n");
        assert!(matches!(RouteTable::load(file.path()), Err(RouteLoadError::Empty { .. })));
    }

    #[test]
    fn malformed_line_is_an_error() {
        let file = write_conf("/api 127.0.0.1\n");
        assert!(matches!(RouteTable::load(file.path()), Err(RouteLoadError::Malformed { .. })));
    }

    #[test]
    fn invalid_port_is_an_error() {
        let file = write_conf("/api 127.0.0.1 not-a-port\n");
        assert!(matches!(RouteTable::load(file.path()), Err(RouteLoadError::InvalidPort { .. })));
    }
}
