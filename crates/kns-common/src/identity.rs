//! Pod identity from downward API environment variables
//!
//! Both binaries learn who they are only through variables injected by the
//! pod spec's field references. A missing or empty variable is a deployment
//! misconfiguration, never something to compute locally.

use crate::config::IdentityEnv;
use crate::error::Error;

/// Trait for reading process environment
///
/// Abstracts `std::env` so identity loading can be tested without touching
/// global state.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait EnvSource: Send + Sync {
    /// Value of the variable, if set
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads the real process environment
#[derive(Clone, Copy, Debug, Default)]
pub struct OsEnv;

impl EnvSource for OsEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Identity of the running pod
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodIdentity {
    /// Pod name (`metadata.name`)
    pub name: String,
    /// Pod namespace (`metadata.namespace`)
    pub namespace: String,
    /// Pod IP (`status.podIP`), only required for agents
    pub address: Option<String>,
}

fn required(env: &dyn EnvSource, key: &str) -> Result<String, Error> {
    match env.var(key) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::config(format!("no value for {key}"))),
    }
}

impl PodIdentity {
    /// Load the coordinator's identity (name and namespace)
    pub fn coordinator(env: &dyn EnvSource, vars: &IdentityEnv) -> Result<Self, Error> {
        Ok(Self {
            name: required(env, &vars.pod_name)?,
            namespace: required(env, &vars.pod_namespace)?,
            address: None,
        })
    }

    /// Load an agent's identity (name, namespace and address)
    pub fn agent(env: &dyn EnvSource, vars: &IdentityEnv) -> Result<Self, Error> {
        Ok(Self {
            name: required(env, &vars.pod_name)?,
            namespace: required(env, &vars.pod_namespace)?,
            address: Some(required(env, &vars.pod_address)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    fn env_with(values: &'static [(&'static str, &'static str)]) -> MockEnvSource {
        let mut mock = MockEnvSource::new();
        mock.expect_var().returning(move |key| {
            values
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        });
        mock
    }

    #[test]
    fn agent_identity_reads_all_three_values() {
        let env = env_with(&[
            ("KNS_POD_NAME", "network-scan-4xq9z"),
            ("KNS_POD_NAMESPACE", "network-scan-x7k2p"),
            ("KNS_POD_ADDRESS", "10.244.1.7"),
        ]);
        let id = PodIdentity::agent(&env, &IdentityEnv::default()).unwrap();
        assert_eq!(id.name, "network-scan-4xq9z");
        assert_eq!(id.namespace, "network-scan-x7k2p");
        assert_eq!(id.address.as_deref(), Some("10.244.1.7"));
    }

    #[test]
    fn missing_address_is_config_error_for_agent_only() {
        let env = env_with(&[
            ("KNS_POD_NAME", "kns-job-x7k2p"),
            ("KNS_POD_NAMESPACE", "default"),
        ]);
        let vars = IdentityEnv::default();

        let err = PodIdentity::agent(&env, &vars).unwrap_err();
        assert!(err.to_string().contains("KNS_POD_ADDRESS"));
        assert_eq!(err.class(), crate::ErrorClass::Configuration);

        let id = PodIdentity::coordinator(&env, &vars).unwrap();
        assert_eq!(id.address, None);
    }

    #[test]
    fn empty_value_counts_as_missing() {
        let mut env = MockEnvSource::new();
        env.expect_var()
            .with(eq("KNS_POD_NAME"))
            .returning(|_| Some(String::new()));

        let err = PodIdentity::coordinator(&env, &IdentityEnv::default()).unwrap_err();
        assert!(err.to_string().contains("no value for KNS_POD_NAME"));
    }

    #[test]
    fn custom_variable_names_are_honoured() {
        let env = env_with(&[("MY_NAME", "kns-job-abc"), ("MY_NS", "scans")]);
        let vars = IdentityEnv {
            pod_name: "MY_NAME".to_string(),
            pod_namespace: "MY_NS".to_string(),
            pod_address: "MY_IP".to_string(),
        };
        let id = PodIdentity::coordinator(&env, &vars).unwrap();
        assert_eq!(id.namespace, "scans");
    }
}
