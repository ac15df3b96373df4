//! Environment propagation into containers
//!
//! Most variables are forwarded by name only (`--env NAME`), so the container
//! runtime copies the value from the host environment. Proxy settings are the
//! exception and are forwarded by value.

use std::collections::HashMap;

/// Variables identifying the CI orchestrator running this invocation
const ORCHESTRATOR_IDENTITY: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "GITHUB_ACTION",
    "GITHUB_ACTOR",
    "GITHUB_JOB",
    "GITHUB_RUN_ID",
    "GITHUB_RUN_NUMBER",
    "GITHUB_RUN_ATTEMPT",
    "GITHUB_WORKFLOW",
    "GITHUB_SERVER_URL",
    "GITHUB_API_URL",
    "RUNNER_OS",
    "RUNNER_ARCH",
];

/// Build and commit metadata
const BUILD_METADATA: &[&str] = &[
    "GITHUB_REPOSITORY",
    "GITHUB_REPOSITORY_OWNER",
    "GITHUB_SHA",
    "GITHUB_REF",
    "GITHUB_REF_NAME",
    "GITHUB_REF_TYPE",
    "GITHUB_EVENT_NAME",
    "BUILD_NUMBER",
    "BUILD_URL",
    "COMMIT_AUTHOR",
    "COMMIT_MESSAGE",
];

const PULL_REQUEST_METADATA: &[&str] = &[
    "GITHUB_HEAD_REF",
    "GITHUB_BASE_REF",
    "PULL_REQUEST_NUMBER",
    "PULL_REQUEST_TITLE",
    "PULL_REQUEST_URL",
    "PULL_REQUEST_AUTHOR",
];

/// Secret material; values never pass through this process's arguments
const SECRET_PLACEHOLDERS: &[&str] = &[
    "VAULT_ADDR",
    "VAULT_NAMESPACE",
    "VAULT_ROLE_ID",
    "VAULT_SECRET_ID",
    "DOCKSIDE_TOKEN",
];

/// Proxy settings, forwarded by value
const PROXY_VARIABLES: &[&str] = &[
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "NO_PROXY",
    "ALL_PROXY",
    "http_proxy",
    "https_proxy",
    "no_proxy",
    "all_proxy",
];

pub fn orchestrator_identity() -> Vec<String> {
    to_owned(ORCHESTRATOR_IDENTITY)
}

pub fn build_metadata() -> Vec<String> {
    to_owned(BUILD_METADATA)
}

pub fn pull_request_metadata() -> Vec<String> {
    to_owned(PULL_REQUEST_METADATA)
}

pub fn secret_placeholders() -> Vec<String> {
    to_owned(SECRET_PLACEHOLDERS)
}

/// Render variable names as `--env NAME` pairs
pub fn name_flags(names: &[String]) -> Vec<String> {
    names
        .iter()
        .flat_map(|name| ["--env".to_string(), name.clone()])
        .collect()
}

/// Render an explicit map as `--env KEY=VALUE` pairs, sorted by key
pub fn map_flags(vars: &HashMap<String, String>) -> Vec<String> {
    let mut keys: Vec<&String> = vars.keys().collect();
    keys.sort();

    keys.into_iter()
        .flat_map(|key| ["--env".to_string(), format!("{}={}", key, vars[key])])
        .collect()
}

/// Proxy flags built from an arbitrary lookup; unset or empty values are skipped
pub fn proxy_flags_from<F>(lookup: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    PROXY_VARIABLES
        .iter()
        .filter_map(|name| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .map(|value| format!("{}={}", name, value))
        })
        .flat_map(|pair| ["--env".to_string(), pair])
        .collect()
}

/// Proxy flags from the current process environment
pub fn proxy_flags() -> Vec<String> {
    proxy_flags_from(|name| std::env::var(name).ok())
}

/// Everything forwarded into the main container
pub fn main_container_flags(extra: &HashMap<String, String>) -> Vec<String> {
    let mut names = orchestrator_identity();
    names.extend(build_metadata());
    names.extend(pull_request_metadata());
    names.extend(secret_placeholders());

    let mut flags = name_flags(&names);
    flags.extend(proxy_flags());
    flags.extend(map_flags(extra));
    flags
}

/// Everything forwarded into the sidecar container
pub fn sidecar_container_flags(extra: &HashMap<String, String>) -> Vec<String> {
    let mut flags = name_flags(&orchestrator_identity());
    flags.extend(proxy_flags());
    flags.extend(map_flags(extra));
    flags
}

fn to_owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}
