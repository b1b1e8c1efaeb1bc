use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use toml::value::{Table, Value};




/// Separator between nested section names in an option path, as in
/// `mesh_0:nx`.
pub const PATH_SEPARATOR: char = ':';




#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML {path:?}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("option '{0}' is not set")]
    Missing(String),
    #[error("option '{path}' has the wrong type: {source}")]
    Type {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("malformed override '{0}', expected key=value")]
    Override(String),
    #[error("cannot set '{0}': a parent of it is not a section")]
    NotASection(String),
}




/**
 * A tree of configuration options. Sections are TOML tables, and leaves are
 * any other TOML value. Options are addressed with a path of section names
 * separated by `:`, e.g. `mesh_0:nx`.
 */
#[derive(Clone, Debug, Default)]
pub struct Options {
    root: Table,
}




// ============================================================================
impl Options {

    pub fn new() -> Self {
        Self::default()
    }


    /**
     * Parse options from TOML source text.
     */
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        Ok(Self { root: toml::from_str(text)? })
    }


    /**
     * Load options from a TOML file. A missing file yields an empty options
     * tree, so a run can be configured entirely from the command line.
     */
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::warn!("no configuration file at {}, starting from defaults", path.display());
            return Ok(Self::new());
        }
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }


    /**
     * Return the value at the given path, if any. The empty path is not a
     * value.
     */
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut keys = path.split(PATH_SEPARATOR);
        let mut node = self.root.get(keys.next()?)?;

        for key in keys {
            node = node.as_table()?.get(key)?;
        }
        Some(node)
    }


    /**
     * Determine whether a section (a table of options) exists at the given
     * path. A leaf value at that path is not a section.
     */
    pub fn is_section(&self, path: &str) -> bool {
        matches!(self.lookup(path), Some(Value::Table(_)))
    }


    /**
     * Return a typed value, or an error if the option is unset.
     */
    pub fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ConfigError> {
        match self.lookup(path) {
            Some(value) => value.clone().try_into().map_err(|source| ConfigError::Type {
                path: path.to_string(),
                source,
            }),
            None => Err(ConfigError::Missing(path.to_string())),
        }
    }


    /**
     * Return a typed value, falling back to `default` if the option is
     * unset. An option that is set but has the wrong type is still an error.
     */
    pub fn get_or<T: DeserializeOwned>(&self, path: &str, default: T) -> Result<T, ConfigError> {
        match self.get(path) {
            Err(ConfigError::Missing(_)) => Ok(default),
            other => other,
        }
    }


    /**
     * Return a view of the options rooted at the given section path. The
     * view is empty if the section does not exist.
     */
    pub fn subsection(&self, path: &str) -> Options {
        match self.lookup(path) {
            Some(Value::Table(table)) => Self { root: table.clone() },
            _ => Self::new(),
        }
    }


    /**
     * Return the keys of the top-level entries of this tree.
     */
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.root.keys().map(String::as_str)
    }


    /**
     * Set the value at the given path, creating intermediate sections as
     * needed.
     */
    pub fn set(&mut self, path: &str, value: Value) -> Result<(), ConfigError> {
        let keys: Vec<_> = path.split(PATH_SEPARATOR).collect();
        let (leaf, parents) = keys.split_last().ok_or_else(|| ConfigError::Override(path.to_string()))?;
        let mut table = &mut self.root;

        for key in parents {
            let entry = table
                .entry(key.to_string())
                .or_insert_with(|| Value::Table(Table::new()));
            table = match entry {
                Value::Table(inner) => inner,
                _ => return Err(ConfigError::NotASection(path.to_string())),
            };
        }
        table.insert(leaf.to_string(), value);
        Ok(())
    }


    /**
     * Apply a command-line override of the form `path=value`. The value is
     * read as a TOML scalar if it parses as one, otherwise as a bare string.
     */
    pub fn apply_override(&mut self, assignment: &str) -> Result<(), ConfigError> {
        let (path, raw) = match assignment.split_once('=') {
            Some((path, raw)) if !path.trim().is_empty() => (path.trim(), raw.trim()),
            _ => return Err(ConfigError::Override(assignment.to_string())),
        };
        let value = format!("value = {}", raw)
            .parse::<Value>()
            .ok()
            .and_then(|parsed| parsed.get("value").cloned())
            .unwrap_or_else(|| Value::String(raw.to_string()));

        self.set(path, value)
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::{ConfigError, Options};

    const SOURCE: &str = r#"
        datadir = "run"

        [mesh_0]
        nx = 8
        ny = 4

        [mesh_0.vars]
        R = 1.5
    "#;


    #[test]
    fn sections_and_leaves_are_distinguished() {
        let options = Options::parse(SOURCE).unwrap();
        assert!(options.is_section("mesh_0"));
        assert!(options.is_section("mesh_0:vars"));
        assert!(!options.is_section("mesh_0:nx"));
        assert!(!options.is_section("datadir"));
        assert!(!options.is_section("mesh_1"));
    }


    #[test]
    fn typed_values_fall_back_to_defaults() {
        let options = Options::parse(SOURCE).unwrap();
        assert_eq!(options.get::<i64>("mesh_0:nx").unwrap(), 8);
        assert_eq!(options.get_or("mesh_0:nz", 1_i64).unwrap(), 1);
        assert_eq!(options.get_or("datadir", "data".to_string()).unwrap(), "run");
        assert_eq!(options.get_or("mesh_0:vars:R", 0.0).unwrap(), 1.5);
    }


    #[test]
    fn wrong_type_is_an_error_even_with_a_default() {
        let options = Options::parse(SOURCE).unwrap();
        assert!(matches!(options.get_or("datadir", 0_i64), Err(ConfigError::Type { .. })));
        assert!(matches!(options.get::<i64>("mesh_0:nz"), Err(ConfigError::Missing(_))));
    }


    #[test]
    fn overrides_create_sections_and_parse_scalars() {
        let mut options = Options::parse(SOURCE).unwrap();
        options.apply_override("mesh_1:nx=20").unwrap();
        options.apply_override("mesh_1:name=alpha").unwrap();
        options.apply_override("mesh_0:ny = 6").unwrap();

        assert!(options.is_section("mesh_1"));
        assert_eq!(options.get::<i64>("mesh_1:nx").unwrap(), 20);
        assert_eq!(options.get::<String>("mesh_1:name").unwrap(), "alpha");
        assert_eq!(options.get::<i64>("mesh_0:ny").unwrap(), 6);
    }


    #[test]
    fn malformed_overrides_are_rejected() {
        let mut options = Options::new();
        assert!(matches!(options.apply_override("nx"), Err(ConfigError::Override(_))));
        assert!(matches!(options.apply_override("=3"), Err(ConfigError::Override(_))));
        options.apply_override("datadir=run").unwrap();
        assert!(matches!(options.apply_override("datadir:x=1"), Err(ConfigError::NotASection(_))));
    }


    #[test]
    fn subsection_views_are_rooted_at_the_section() {
        let options = Options::parse(SOURCE).unwrap();
        let mesh = options.subsection("mesh_0");
        assert_eq!(mesh.get::<i64>("nx").unwrap(), 8);
        assert!(mesh.is_section("vars"));
        assert_eq!(options.subsection("mesh_9").keys().count(), 0);
    }
}
