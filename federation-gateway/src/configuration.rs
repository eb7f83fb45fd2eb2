//! Logic for loading configuration in to an object model

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

use crate::error::ConfigurationError;
use crate::execution::ExecutionOptions;
use crate::query_planner::DEFAULT_CACHE_LIMIT;

/// The configuration of a gateway.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// Subgraphs, in composition order.
    #[serde(default)]
    pub subgraphs: IndexMap<String, SubgraphConfiguration>,

    #[serde(default)]
    pub planner: PlannerConfiguration,

    #[serde(default)]
    pub execution: ExecutionOptions,
}

/// Where a subgraph is served and its schema.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SubgraphConfiguration {
    pub routing_url: String,
    pub schema: SchemaSource,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum SchemaSource {
    /// A file holding the SDL.
    File(PathBuf),
    /// The SDL itself.
    Sdl(String),
}

impl SchemaSource {
    /// Read the SDL.
    pub fn load(&self) -> Result<String, ConfigurationError> {
        match self {
            SchemaSource::Sdl(sdl) => Ok(sdl.clone()),
            SchemaSource::File(path) => {
                fs::read_to_string(path).map_err(|error| ConfigurationError::Io {
                    path: path.display().to_string(),
                    reason: error.to_string(),
                })
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct PlannerConfiguration {
    /// How many query plans are kept in memory.
    pub cache_limit: usize,
}

impl Default for PlannerConfiguration {
    fn default() -> Self {
        PlannerConfiguration {
            cache_limit: DEFAULT_CACHE_LIMIT,
        }
    }
}

impl Configuration {
    /// Load a configuration file. Relative schema files are resolved against
    /// the directory of the file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Configuration, ConfigurationError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|error| ConfigurationError::Io {
            path: path.display().to_string(),
            reason: error.to_string(),
        })?;
        let mut configuration: Configuration = content.parse()?;
        if let Some(directory) = path.parent() {
            configuration.resolve_schema_files(directory);
        }
        Ok(configuration)
    }

    fn resolve_schema_files(&mut self, directory: &Path) {
        for subgraph in self.subgraphs.values_mut() {
            if let SchemaSource::File(file) = &mut subgraph.schema {
                if file.is_relative() {
                    *file = directory.join(&*file);
                }
            }
        }
    }

    /// The name, routing URL and SDL of every subgraph.
    pub fn load_subgraphs(&self) -> Result<Vec<(String, String, String)>, ConfigurationError> {
        self.subgraphs
            .iter()
            .map(|(name, subgraph)| {
                let sdl = subgraph
                    .schema
                    .load()
                    .map_err(|error| ConfigurationError::InvalidSubgraph {
                        name: name.clone(),
                        reason: error.to_string(),
                    })?;
                Ok((name.clone(), subgraph.routing_url.clone(), sdl))
            })
            .collect()
    }
}

impl FromStr for Configuration {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(serde_yaml::from_str(s)?)
    }
}
