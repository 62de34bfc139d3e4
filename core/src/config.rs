//! Manifest of chart museums.
//!
//! Stored as JSON at `<config dir>/churl/config.json`:
//!
//! ```json
//! {
//!   "current": "default",
//!   "museums": [
//!     { "name": "default", "kubeContext": "krobot", "namespace": "default",
//!       "serviceName": "cm-chartmuseum", "port": 8080 }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::domain::SelectedTarget;
use crate::error::{Error, Result};
use crate::ports::TargetSource;

/// Directory under the user config dir holding the manifest.
pub const CONFIG_DIR_NAME: &str = "churl";

/// Manifest file name.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Namespace used when a museum entry names none.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Returns `<config dir>/churl/config.json`.
pub fn default_manifest_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;
    Ok(config_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// One chart museum reachable through a cluster service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Museum {
    pub name: String,

    /// kubeconfig context; `None` uses the current context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_context: Option<String>,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    pub service_name: String,

    /// Port spec; a JSON number or string (`8080`, `"http"`).
    #[serde(
        serialize_with = "serialize_port",
        deserialize_with = "deserialize_port"
    )]
    pub port: String,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl From<&Museum> for SelectedTarget {
    fn from(museum: &Museum) -> Self {
        Self {
            name: museum.name.clone(),
            kube_context: museum.kube_context.clone(),
            namespace: museum.namespace.clone(),
            service_name: museum.service_name.clone(),
            port: museum.port.clone(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(u64),
    Text(String),
}

fn deserialize_port<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(match PortValue::deserialize(deserializer)? {
        PortValue::Number(n) => n.to_string(),
        PortValue::Text(s) => s,
    })
}

fn serialize_port<S: Serializer>(port: &str, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match port.parse::<u64>() {
        Ok(n) => serializer.serialize_u64(n),
        Err(_) => serializer.serialize_str(port),
    }
}

/// On-disk shape of the manifest.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Document {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current: Option<String>,
    #[serde(default)]
    museums: Vec<Museum>,
}

/// The chart museums churl knows about and which one is selected.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    path: Option<PathBuf>,
    current: Option<String>,
    museums: Vec<Museum>,
}

impl Manifest {
    /// Reads a manifest from `reader`. The result has no file to save to.
    pub fn open(mut reader: impl Read) -> Result<Self> {
        let mut content = String::new();
        reader
            .read_to_string(&mut content)
            .map_err(|e| Error::Config(format!("Failed to read manifest: {}", e)))?;
        Self::parse(&content)
    }

    /// Loads the manifest at `path`.
    pub async fn open_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!("Failed to read manifest '{}': {}", path.display(), e))
        })?;

        let mut manifest = Self::parse(&content)?;
        manifest.path = Some(path.to_path_buf());
        debug!(path = %path.display(), museums = manifest.museums.len(), "Loaded manifest");
        Ok(manifest)
    }

    /// Creates an empty manifest at `path`. Fails if the file already exists.
    pub async fn init(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if fs::try_exists(path).await.unwrap_or(false) {
            return Err(Error::Config(format!(
                "Manifest '{}' already exists",
                path.display()
            )));
        }

        let manifest = Self {
            path: Some(path.to_path_buf()),
            ..Self::default()
        };
        manifest.save().await?;
        Ok(manifest)
    }

    fn parse(content: &str) -> Result<Self> {
        let document: Document = serde_json::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse manifest: {}", e)))?;

        let mut seen = HashSet::new();
        for museum in &document.museums {
            validate(museum)?;
            if !seen.insert(museum.name.as_str()) {
                return Err(Error::Config(format!(
                    "Museum '{}' is defined more than once",
                    museum.name
                )));
            }
        }

        Ok(Self {
            path: None,
            current: document.current,
            museums: document.museums,
        })
    }

    /// Writes the manifest back to the file it was loaded from.
    ///
    /// The file is replaced atomically; parent directories are created.
    pub async fn save(&self) -> Result<()> {
        let path = self
            .path
            .as_deref()
            .ok_or_else(|| Error::Config("Manifest has no file to save to".to_string()))?;

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| Error::Config(format!("Failed to create config directory: {}", e)))?;
        }

        let document = Document {
            current: self.current.clone(),
            museums: self.museums.clone(),
        };
        let content = serde_json::to_string_pretty(&document)
            .map_err(|e| Error::Config(format!("Failed to serialize manifest: {}", e)))?;

        let temp_path = path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| Error::Config(format!("Failed to create temp manifest file: {}", e)))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| Error::Config(format!("Failed to write manifest: {}", e)))?;
        file.sync_all()
            .await
            .map_err(|e| Error::Config(format!("Failed to sync manifest: {}", e)))?;

        fs::rename(&temp_path, path)
            .await
            .map_err(|e| Error::Config(format!("Failed to rename manifest file: {}", e)))?;

        debug!(path = %path.display(), "Saved manifest");
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn museums(&self) -> &[Museum] {
        &self.museums
    }

    pub fn museum(&self, name: &str) -> Option<&Museum> {
        self.museums.iter().find(|m| m.name == name)
    }

    /// Adds a museum. Names are unique.
    pub fn add_museum(&mut self, museum: Museum) -> Result<()> {
        validate(&museum)?;
        if self.museum(&museum.name).is_some() {
            return Err(Error::Config(format!(
                "Museum '{}' already exists",
                museum.name
            )));
        }
        self.museums.push(museum);
        Ok(())
    }

    /// Selects the museum `current()` returns.
    pub fn set_current(&mut self, name: &str) -> Result<()> {
        if self.museum(name).is_none() {
            return Err(Error::Config(format!("No museum named '{}'", name)));
        }
        self.current = Some(name.to_string());
        Ok(())
    }

    /// The selected museum.
    ///
    /// Without an explicit selection, a manifest with a single museum selects it.
    pub fn current_museum(&self) -> Result<&Museum> {
        match (&self.current, self.museums.as_slice()) {
            (Some(name), _) => self
                .museum(name)
                .ok_or_else(|| Error::Config(format!("Current museum '{}' is not defined", name))),
            (None, [only]) => Ok(only),
            (None, []) => Err(Error::Config("No museums configured".to_string())),
            (None, _) => Err(Error::Config(
                "Several museums configured but none is selected as current".to_string(),
            )),
        }
    }
}

impl TargetSource for Manifest {
    fn current(&self) -> Result<SelectedTarget> {
        self.current_museum().map(SelectedTarget::from)
    }
}

fn validate(museum: &Museum) -> Result<()> {
    if museum.name.trim().is_empty() {
        return Err(Error::Config("Museum name must not be empty".to_string()));
    }
    if museum.service_name.trim().is_empty() {
        return Err(Error::Config(format!(
            "Museum '{}' has no serviceName",
            museum.name
        )));
    }
    if museum.port.trim().is_empty() {
        return Err(Error::Config(format!("Museum '{}' has no port", museum.name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const KNOWN_GOOD: &str = r#"{
        "museums": [
            {
                "name": "default",
                "kubeContext": "krobot",
                "serviceName": "cm-chartmuseum",
                "port": 8080
            }
        ]
    }"#;

    fn museum(name: &str, port: &str) -> Museum {
        Museum {
            name: name.to_string(),
            kube_context: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            service_name: "cm".to_string(),
            port: port.to_string(),
        }
    }

    #[test]
    fn test_open() {
        let manifest = Manifest::open(KNOWN_GOOD.as_bytes()).unwrap();
        assert_eq!(manifest.museums().len(), 1);
        assert!(manifest.path().is_none());

        let current = manifest.current().unwrap();
        assert_eq!(current.kube_context.as_deref(), Some("krobot"));
        assert_eq!(current.namespace, "default");
        assert_eq!(current.port, "8080");
    }

    #[test]
    fn test_string_port() {
        let json = r#"{"museums": [{"name": "a", "serviceName": "cm", "port": "http"}]}"#;
        let manifest = Manifest::open(json.as_bytes()).unwrap();
        assert_eq!(manifest.museum("a").unwrap().port, "http");
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let json = r#"{"museums": [{"name": "a", "serviceName": "cm", "port": 1, "colour": "red"}]}"#;
        assert!(matches!(
            Manifest::open(json.as_bytes()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let json = r#"{"museums": [
            {"name": "a", "serviceName": "cm", "port": 1},
            {"name": "a", "serviceName": "cm2", "port": 2}
        ]}"#;
        let err = Manifest::open(json.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_current_selection() {
        let mut manifest = Manifest::default();
        assert!(manifest.current().is_err());

        manifest.add_museum(museum("a", "8080")).unwrap();
        manifest.add_museum(museum("b", "9090")).unwrap();
        assert!(manifest.current().is_err());
        assert!(manifest.add_museum(museum("a", "1")).is_err());

        manifest.set_current("b").unwrap();
        assert_eq!(manifest.current().unwrap().port, "9090");
        assert!(manifest.set_current("c").is_err());
    }

    #[tokio::test]
    async fn test_init_save_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        let mut manifest = Manifest::init(&path).await.unwrap();
        assert!(manifest.museums().is_empty());

        manifest.add_museum(museum("foo", "123")).unwrap();
        manifest.add_museum(museum("bar", "http")).unwrap();
        manifest.set_current("foo").unwrap();
        manifest.save().await.unwrap();

        let reopened = Manifest::open_from_file(&path).await.unwrap();
        assert_eq!(reopened.museums().len(), 2);
        assert_eq!(reopened.current().unwrap().name, "foo");

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["museums"][0]["port"], serde_json::json!(123));
        assert_eq!(raw["museums"][1]["port"], serde_json::json!("http"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_init_refuses_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, KNOWN_GOOD).unwrap();

        assert!(Manifest::init(&path).await.is_err());
        // The existing manifest is untouched.
        assert_eq!(std::fs::read_to_string(&path).unwrap(), KNOWN_GOOD);
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let dir = tempdir().unwrap();
        let err = Manifest::open_from_file(dir.path().join("missing.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_save_without_path() {
        let manifest = Manifest::open(KNOWN_GOOD.as_bytes()).unwrap();
        assert!(manifest.save().await.is_err());
    }
}
