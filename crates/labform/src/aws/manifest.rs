//! Projects declared in a TOML (or JSON) file.
//!
//! ```toml
//! [project]
//! name = "C4W1"
//!
//! [policies.C4W1-Kms-EncryptPolicy]
//! Version = "2012-10-17"
//! Statement = [{ Effect = "Allow", Action = ["kms:Encrypt"], Resource = "*" }]
//!
//! [roles.C4W1-Kms-EncryptRole]
//! principal = "current_account"
//! policies = ["C4W1-Kms-EncryptPolicy"]
//!
//! [keys.C4W1-Kms-Key]
//! description = "KMS Key for C4W1"
//! ```
use std::path::Path;

use snafu::prelude::*;

use super::{
    apigateway::{RestApi, RestApiDefinition},
    dynamodb::{Table, TableDefinition},
    iam::{IamPolicy, IamRole, RoleDefinition},
    kms::{KeyDefinition, Kms},
    lambda::{Function, FunctionDefinition},
    sns::{Topic, TopicDefinition},
    sqs::{Queue, QueueDefinition},
    Session,
};
use crate::{
    Definitions, ManifestJsonSnafu, ManifestReadSnafu, ManifestTomlSnafu, Project, Result,
};

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProjectSection {
    pub name: String,
    /// Name of a role to assume before acting on the resources.
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Manifest {
    pub project: ProjectSection,
    #[serde(default)]
    pub policies: Definitions<serde_json::Value>,
    #[serde(default)]
    pub roles: Definitions<RoleDefinition>,
    #[serde(default)]
    pub keys: Definitions<KeyDefinition>,
    #[serde(default)]
    pub tables: Definitions<TableDefinition>,
    #[serde(default)]
    pub queues: Definitions<QueueDefinition>,
    #[serde(default)]
    pub topics: Definitions<TopicDefinition>,
    #[serde(default)]
    pub functions: Definitions<FunctionDefinition>,
    #[serde(default)]
    pub apis: Definitions<RestApiDefinition>,
}

impl Manifest {
    /// Reads a manifest, parsed as JSON when the extension is `.json` and as
    /// TOML otherwise.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).context(ManifestReadSnafu { path })?;
        if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&contents).context(ManifestJsonSnafu { path })
        } else {
            toml::from_str(&contents).context(ManifestTomlSnafu { path })
        }
    }

    /// Kinds with at least one definition, in the order they are created.
    pub fn kinds(&self) -> Vec<&'static str> {
        use crate::Service;

        [
            (IamPolicy::KIND, self.policies.is_empty()),
            (IamRole::KIND, self.roles.is_empty()),
            (Kms::KIND, self.keys.is_empty()),
            (Table::KIND, self.tables.is_empty()),
            (Queue::KIND, self.queues.is_empty()),
            (Topic::KIND, self.topics.is_empty()),
            (Function::KIND, self.functions.is_empty()),
            (RestApi::KIND, self.apis.is_empty()),
        ]
        .into_iter()
        .filter_map(|(kind, empty)| (!empty).then_some(kind))
        .collect()
    }

    /// Registers every non-empty table in a project, assuming the project's
    /// role with `base` if it names one.
    ///
    /// Kinds are registered so that resources are created after the ones
    /// they refer to.
    pub async fn into_project(self, base: &Session) -> Result<Project<Session>> {
        let mut project = match self.project.role.as_deref() {
            Some(role) => Project::assume(self.project.name.clone(), role, base).await?,
            None => Project::new(self.project.name.clone(), base.clone()),
        };
        fn non_empty<D>(definitions: Definitions<D>) -> Option<Definitions<D>> {
            (!definitions.is_empty()).then_some(definitions)
        }
        if let Some(policies) = non_empty(self.policies) {
            project.add_config(IamPolicy, Some(policies));
        }
        if let Some(roles) = non_empty(self.roles) {
            project.add_config(IamRole, Some(roles));
        }
        if let Some(keys) = non_empty(self.keys) {
            project.add_config(Kms, Some(keys));
        }
        if let Some(tables) = non_empty(self.tables) {
            project.add_config(Table, Some(tables));
        }
        if let Some(queues) = non_empty(self.queues) {
            project.add_config(Queue, Some(queues));
        }
        if let Some(topics) = non_empty(self.topics) {
            project.add_config(Topic, Some(topics));
        }
        if let Some(functions) = non_empty(self.functions) {
            project.add_config(Function, Some(functions));
        }
        if let Some(apis) = non_empty(self.apis) {
            project.add_config(RestApi, Some(apis));
        }
        Ok(project)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::aws::iam::Principal;

    const MANIFEST: &str = r#"
        [project]
        name = "C4W1"
        role = "C4W1-Kms-EncryptRole"

        [policies.C4W1-Kms-EncryptPolicy]
        Version = "2012-10-17"
        Statement = [{ Effect = "Allow", Action = ["kms:Encrypt", "kms:Decrypt"], Resource = "*" }]

        [roles.C4W1-Kms-EncryptRole]
        principal = "current_account"
        policies = ["C4W1-Kms-EncryptPolicy"]

        [keys.C4W1-Kms-Key]
        description = "KMS Key for C4W1"
        tags = { Context = "C4W1 Runner" }
    "#;

    #[test]
    fn parse_toml_manifest() {
        let manifest: Manifest = toml::from_str(MANIFEST).unwrap();
        assert_eq!(Some("C4W1-Kms-EncryptRole"), manifest.project.role.as_deref());
        assert_eq!(vec!["policy", "role", "key"], manifest.kinds());
        assert_eq!(
            serde_json::json!(["kms:Encrypt", "kms:Decrypt"]),
            manifest.policies["C4W1-Kms-EncryptPolicy"]["Statement"][0]["Action"]
        );
        assert_eq!(
            Principal::CurrentAccount,
            manifest.roles["C4W1-Kms-EncryptRole"].principal
        );
        assert_eq!("C4W1 Runner", manifest.keys["C4W1-Kms-Key"].tags["Context"]);
    }

    #[test]
    fn read_manifest_files() {
        let dir = std::env::temp_dir().join(format!("labform-manifest-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let toml_path = dir.join("c4w1.toml");
        std::fs::write(&toml_path, MANIFEST).unwrap();
        let from_toml = Manifest::from_path(&toml_path).unwrap();

        let json_path = dir.join("c4w1.json");
        std::fs::write(&json_path, serde_json::to_string(&from_toml).unwrap()).unwrap();
        let from_json = Manifest::from_path(&json_path).unwrap();
        assert_eq!(from_toml, from_json);

        let err = Manifest::from_path(dir.join("missing.toml")).unwrap_err();
        assert!(matches!(err, crate::Error::ManifestRead { .. }));

        std::fs::write(&toml_path, "[project]\n").unwrap();
        let err = Manifest::from_path(&toml_path).unwrap_err();
        assert!(matches!(err, crate::Error::ManifestToml { .. }), "{err}");

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
