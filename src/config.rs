use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cli::Cli;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file {0} does not exist")]
    Missing(PathBuf),
    #[error("error loading config {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: figment::Error,
    },
    #[error("config entry {0} has no template")]
    NoTemplate(usize),
    #[error("no template given")]
    MissingTemplate,
}

/// One template to materialize.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TemplateConfig {
    pub template: PathBuf,
    /// Empty means standard output.
    pub dest: String,
    pub watch: bool,
    #[serde(rename = "notifycmd", alias = "notify_cmd")]
    pub notify_cmd: String,
    #[serde(rename = "onlyexposed", alias = "only_exposed")]
    pub only_exposed: bool,
    #[serde(rename = "onlypublished", alias = "only_published")]
    pub only_published: bool,
}

impl TemplateConfig {
    pub fn destination(&self) -> Option<&Path> {
        (!self.dest.is_empty()).then(|| Path::new(&self.dest))
    }

    pub fn notify_command(&self) -> Option<&str> {
        let cmd = self.notify_cmd.trim();
        (!cmd.is_empty()).then_some(cmd)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ConfigSet(pub Vec<TemplateConfig>);

impl ConfigSet {
    /// The configs that are regenerated on container events.
    pub fn watched(&self) -> ConfigSet {
        ConfigSet(self.0.iter().filter(|c| c.watch).cloned().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TemplateConfig> {
        self.0.iter()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(rename = "config", default)]
    pub templates: ConfigSet,
}

impl Settings {
    /// Load a TOML (or, by extension, JSON) config file.  `DOCKER_GEN_ENDPOINT`
    /// overrides the file's `endpoint`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }

        let figment = Figment::from(Serialized::defaults(Settings::default()));
        let figment = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => figment.merge(Json::file(path)),
            _ => figment.merge(Toml::file(path)),
        };
        let settings: Settings = figment
            .merge(Env::prefixed("DOCKER_GEN_").only(&["endpoint"]))
            .extract()
            .map_err(|source| ConfigError::Load {
                path: path.to_path_buf(),
                source,
            })?;

        if let Some(index) = settings
            .templates
            .iter()
            .position(|c| c.template.as_os_str().is_empty())
        {
            return Err(ConfigError::NoTemplate(index));
        }
        Ok(settings)
    }

    /// Settings from a config file when one is given, otherwise a single
    /// template built from the positional arguments and flags.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        if let Some(path) = &cli.config {
            let mut settings = Self::load(path)?;
            if cli.endpoint.is_some() {
                settings.endpoint = cli.endpoint.clone();
            }
            return Ok(settings);
        }

        let template = cli.template.clone().ok_or(ConfigError::MissingTemplate)?;
        let config = TemplateConfig {
            template,
            dest: cli
                .dest
                .as_ref()
                .map(|d| d.to_string_lossy().into_owned())
                .unwrap_or_default(),
            watch: cli.watch,
            notify_cmd: cli.notify.clone().unwrap_or_default(),
            only_exposed: cli.only_exposed,
            only_published: cli.only_published,
        };
        Ok(Self {
            endpoint: cli.endpoint.clone(),
            templates: ConfigSet(vec![config]),
        })
    }
}
