//! Candidate predicate deciding which discovered endpoints get a shadow

use crate::graph::{keys, Properties};

/// Prefix of the `node.name` given to every shadow stream
///
/// Shadows are never candidates themselves, whatever the configured names.
pub const SHADOW_NODE_PREFIX: &str = "pw-shadow.";

/// Decides whether a discovered global should be mirrored
pub trait CandidateFilter: Send {
    fn is_candidate(&self, type_: &str, props: &Properties) -> bool;
}

impl<F> CandidateFilter for F
where
    F: Fn(&str, &Properties) -> bool + Send,
{
    fn is_candidate(&self, type_: &str, props: &Properties) -> bool {
        self(type_, props)
    }
}

/// Matches nodes by exact `application.name`
#[derive(Debug, Clone)]
pub struct AppNameFilter {
    node_type: String,
    app_names: Vec<String>,
}

impl AppNameFilter {
    pub fn new(node_type: impl Into<String>, app_names: Vec<String>) -> Self {
        Self {
            node_type: node_type.into(),
            app_names,
        }
    }

    pub fn from_config(config: &crate::config::MatchingConfig) -> Self {
        Self::new(config.node_type.clone(), config.app_names.clone())
    }
}

impl CandidateFilter for AppNameFilter {
    fn is_candidate(&self, type_: &str, props: &Properties) -> bool {
        if type_ != self.node_type {
            return false;
        }

        let is_shadow = props
            .get(keys::NODE_NAME)
            .is_some_and(|name| name.starts_with(SHADOW_NODE_PREFIX));
        if is_shadow {
            return false;
        }

        props
            .get(keys::APP_NAME)
            .is_some_and(|name| self.app_names.iter().any(|wanted| wanted == name))
    }
}
