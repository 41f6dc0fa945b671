//! Template variable substitution engine
//!
//! Provides ${variable} style template substitution used for:
//! - Parameterised SQL (`${region}`, `${limit}`, `${username}`, ...)
//! - Tenant connection strings (`${db_name}`, `${tenant_name}`)
//! - Environment variables (`${env.VAR_NAME}`), connection strings only
//! - Escape mechanism ($${variable} → ${variable})
//! - Safe handling of missing variables

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

use crate::collaborators::TemplateRenderer;
use crate::context::ExecutionContext;
use crate::tenant::Tenant;
use crate::{Error, Result};

/// Regex for matching ${variable} or ${env.VAR_NAME} patterns
static TEMPLATE_VAR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}")
        .expect("template variable regex is valid")
});

/// Regex for matching escaped variables $${variable}
static ESCAPED_VAR_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\$\{([^}]+)\}").expect("escaped variable regex is valid"));

/// Sensitive environment variable prefixes
const SENSITIVE_PREFIXES: &[&str] = &[
    "AWS_", "GITHUB_", "GITLAB_", "AZURE_", "GCP_", "DOCKER_", "PGPASS", "DATABASE_",
    "QUERYDESK_",
];

/// Sensitive environment variable patterns (suffixes and substrings)
const SENSITIVE_PATTERNS: &[&str] = &[
    "_KEY", "_SECRET", "_PASSWORD", "_TOKEN", "_CREDS", "_AUTH", "_PRIVATE", "_CERT", "_PEM",
    "_JWT", "_OAUTH", "_APIKEY", "_URI", "_URL", "_DSN",
];

/// Check if an environment variable name is potentially sensitive
fn is_sensitive_env_var(var_name: &str) -> bool {
    let upper = var_name.to_uppercase();

    if SENSITIVE_PREFIXES
        .iter()
        .any(|prefix| upper.starts_with(prefix))
    {
        return true;
    }

    if SENSITIVE_PATTERNS
        .iter()
        .any(|pattern| upper.ends_with(pattern) || upper.contains(pattern))
    {
        return true;
    }

    matches!(
        upper.as_str(),
        "PASSWORD" | "SECRET" | "TOKEN" | "KEY" | "CREDENTIALS"
    )
}

/// Context for template variable substitution
///
/// # Thread Safety
///
/// Not meant to be shared across threads: it keeps an unsynchronised cache of
/// environment variables. Build one per render.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    /// Named variables (builtins and caller-supplied parameters)
    variables: HashMap<String, String>,
    /// Environment variables (loaded on demand)
    env_vars: HashMap<String, String>,
    /// Whether `${env.*}` resolves at all; off unless enabled
    env_lookup: bool,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the variable set for rendering a query's SQL.
    ///
    /// Caller-supplied template parameters are visible by name; the builtins
    /// `limit`, `select_as_cta`, `username`, `database` and `backend` take
    /// precedence over parameters of the same name.
    pub fn from_execution_context(context: &ExecutionContext) -> Self {
        let mut ctx = Self::new();
        for (name, value) in &context.template_params {
            ctx.variables.insert(name.clone(), value_to_string(value));
        }

        ctx = ctx
            .with_variable("limit", context.limit.to_string())
            .with_variable("select_as_cta", context.select_as_cta.to_string())
            .with_variable("timestamp", chrono::Utc::now().to_rfc3339());
        if let Some(username) = &context.username {
            ctx = ctx.with_variable("username", username.clone());
        }
        if let Some(database) = &context.database {
            ctx = ctx
                .with_variable("database", database.database_name.clone())
                .with_variable("backend", database.backend.clone());
        }
        ctx
    }

    /// Build the variable set for a tenant connection string
    pub fn for_tenant(tenant: &Tenant) -> Self {
        Self::new()
            .with_env_lookup()
            .with_variable("db_name", tenant.db_name.clone())
            .with_variable("tenant_name", tenant.name.clone())
    }

    /// Set a named variable
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Resolve `${env.VAR}` from the process environment
    ///
    /// Only for operator-controlled templates. Query SQL is user input and
    /// never gets this.
    pub fn with_env_lookup(mut self) -> Self {
        self.env_lookup = true;
        self
    }

    /// Load an environment variable (with security filtering)
    fn get_env_var(&mut self, var_name: &str) -> Option<String> {
        if is_sensitive_env_var(var_name) {
            tracing::warn!(
                "Rejecting access to potentially sensitive environment variable: {}",
                var_name
            );
            return None;
        }

        if let Some(value) = self.env_vars.get(var_name) {
            return Some(value.clone());
        }

        if let Ok(value) = std::env::var(var_name) {
            self.env_vars.insert(var_name.to_string(), value.clone());
            Some(value)
        } else {
            None
        }
    }

    /// Get a variable value by name
    fn get_variable(&mut self, var_name: &str) -> Option<String> {
        if let Some(env_var) = var_name.strip_prefix("env.")
            && self.env_lookup
        {
            return self.get_env_var(env_var);
        }
        self.variables.get(var_name).cloned()
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Substitute template variables in a string
///
/// Replaces ${variable} with values from the context.
/// Escaped variables $${variable} become ${variable} (literal).
/// Missing variables are kept as-is and logged at debug level.
///
/// # Examples
///
/// ```
/// use querydesk_core::template::{TemplateContext, substitute_string};
///
/// let mut ctx = TemplateContext::new().with_variable("region", "EMEA");
/// let sql = substitute_string("SELECT * FROM sales WHERE region = '${region}'", &mut ctx);
/// assert_eq!(sql, "SELECT * FROM sales WHERE region = 'EMEA'");
/// ```
pub fn substitute_string(template: &str, context: &mut TemplateContext) -> String {
    // Park escaped variables so the substitution pass skips them
    let with_escapes_handled = ESCAPED_VAR_REGEX.replace_all(template, "<<<ESCAPED:$1>>>");

    let result = TEMPLATE_VAR_REGEX.replace_all(&with_escapes_handled, |caps: &regex::Captures| {
        let var_name = &caps[1];
        context.get_variable(var_name).unwrap_or_else(|| {
            tracing::debug!(
                "Template variable not found, keeping as-is: ${{{}}}",
                var_name
            );
            format!("${{{}}}", var_name)
        })
    });

    result.replace("<<<ESCAPED:", "${").replace(">>>", "}")
}

/// Build a tenant's connection string from the configured template
///
/// ```
/// use querydesk_core::{Tenant, template::render_connection_string};
///
/// let tenant = Tenant::new(1, "acme", "acme_prod");
/// assert_eq!(
///     render_connection_string("postgres://db.internal/${db_name}", &tenant),
///     "postgres://db.internal/acme_prod"
/// );
/// ```
pub fn render_connection_string(template: &str, tenant: &Tenant) -> String {
    let mut ctx = TemplateContext::for_tenant(tenant);
    substitute_string(template, &mut ctx)
}

/// `${variable}` renderer for query SQL
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlTemplateRenderer;

impl SqlTemplateRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl TemplateRenderer for SqlTemplateRenderer {
    fn render(&self, context: &ExecutionContext) -> Result<String> {
        let sql = context
            .sql
            .as_deref()
            .ok_or_else(|| Error::Template("Execution context carries no SQL".to_string()))?;
        let mut ctx = TemplateContext::from_execution_context(context);
        Ok(substitute_string(sql, &mut ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DatabaseRef;

    fn test_context() -> TemplateContext {
        TemplateContext::new()
            .with_variable("region", "EMEA")
            .with_variable("limit", "100")
            .with_variable("username", "alice")
    }

    #[test]
    fn test_substitute_simple_variable() {
        let mut ctx = test_context();
        let result = substitute_string("WHERE region = '${region}'", &mut ctx);
        assert_eq!(result, "WHERE region = 'EMEA'");
    }

    #[test]
    fn test_substitute_multiple_variables() {
        let mut ctx = test_context();
        let result = substitute_string("-- ${username}: ${region} LIMIT ${limit}", &mut ctx);
        assert_eq!(result, "-- alice: EMEA LIMIT 100");
    }

    #[test]
    fn test_substitute_escaped_variable() {
        let mut ctx = test_context();
        let result = substitute_string("SELECT '$${region}'", &mut ctx);
        assert_eq!(result, "SELECT '${region}'");
    }

    #[test]
    fn test_substitute_mixed_escaped_and_real() {
        let mut ctx = test_context();
        let result = substitute_string("Real: ${region}, Literal: $${not_real}", &mut ctx);
        assert_eq!(result, "Real: EMEA, Literal: ${not_real}");
    }

    #[test]
    fn test_substitute_env_variable() {
        unsafe {
            std::env::set_var("QD_TEMPLATE_TEST_SCHEMA", "analytics");
        }
        let mut ctx = test_context().with_env_lookup();
        let result = substitute_string("SELECT * FROM ${env.QD_TEMPLATE_TEST_SCHEMA}.t", &mut ctx);
        assert_eq!(result, "SELECT * FROM analytics.t");
        unsafe {
            std::env::remove_var("QD_TEMPLATE_TEST_SCHEMA");
        }
    }

    #[test]
    fn test_substitute_env_variable_missing() {
        let mut ctx = test_context().with_env_lookup();
        let result = substitute_string("Env: ${env.NONEXISTENT_QD_VAR}", &mut ctx);
        assert_eq!(result, "Env: ${env.NONEXISTENT_QD_VAR}");
    }

    #[test]
    fn test_substitute_rejects_sensitive_env_vars() {
        unsafe {
            std::env::set_var("QD_TEST_PASSWORD", "secret");
            std::env::set_var("WAREHOUSE_DSN", "postgres://u:p@h/db");
        }

        let mut ctx = test_context().with_env_lookup();
        assert_eq!(
            substitute_string("${env.QD_TEST_PASSWORD}", &mut ctx),
            "${env.QD_TEST_PASSWORD}"
        );
        assert_eq!(
            substitute_string("${env.WAREHOUSE_DSN}", &mut ctx),
            "${env.WAREHOUSE_DSN}"
        );

        unsafe {
            std::env::remove_var("QD_TEST_PASSWORD");
            std::env::remove_var("WAREHOUSE_DSN");
        }
    }

    #[test]
    fn test_env_variables_stay_literal_without_lookup() {
        unsafe {
            std::env::set_var("QD_TEMPLATE_TEST_CONN", "sqlite:file:x");
        }
        let mut ctx = test_context();
        assert_eq!(
            substitute_string("${env.QD_TEMPLATE_TEST_CONN}", &mut ctx),
            "${env.QD_TEMPLATE_TEST_CONN}"
        );
        unsafe {
            std::env::remove_var("QD_TEMPLATE_TEST_CONN");
        }
    }

    #[test]
    fn test_substitute_unknown_variable() {
        let mut ctx = test_context();
        let result = substitute_string("Unknown: ${unknown_var}", &mut ctx);
        assert_eq!(result, "Unknown: ${unknown_var}");
    }

    #[test]
    fn test_substitute_no_variables() {
        let mut ctx = test_context();
        assert_eq!(substitute_string("SELECT 1", &mut ctx), "SELECT 1");
        assert_eq!(substitute_string("", &mut ctx), "");
    }

    #[test]
    fn test_connection_string_template() {
        let tenant = Tenant::new(7, "acme", "acme_db");
        assert_eq!(
            render_connection_string("sqlite:file:${db_name}?mode=memory&cache=shared", &tenant),
            "sqlite:file:acme_db?mode=memory&cache=shared"
        );
        assert_eq!(
            render_connection_string("postgres://h/${tenant_name}_${db_name}", &tenant),
            "postgres://h/acme_acme_db"
        );
    }

    #[test]
    fn test_renderer_uses_params_and_builtins() {
        let mut params = serde_json::Map::new();
        params.insert("region".to_string(), Value::String("APAC".to_string()));
        params.insert("min_total".to_string(), serde_json::json!(250));
        params.insert("limit".to_string(), serde_json::json!(5));

        let mut context = ExecutionContext::new(DatabaseRef::new(1, "sales", "sqlite"), 1000)
            .with_template_params(params);
        context.set_sql(
            "SELECT * FROM ${database}.orders WHERE region = '${region}' AND total > ${min_total} LIMIT ${limit}",
        );

        let rendered = SqlTemplateRenderer::new().render(&context).unwrap();
        assert_eq!(
            rendered,
            "SELECT * FROM sales.orders WHERE region = 'APAC' AND total > 250 LIMIT 1000"
        );
    }

    #[test]
    fn test_renderer_never_reads_environment() {
        unsafe {
            std::env::set_var("QD_RENDER_TEST_PWD", "hunter2");
        }
        let mut context = ExecutionContext::new(DatabaseRef::new(1, "sales", "sqlite"), 1000);
        context.set_sql("SELECT '${env.QD_RENDER_TEST_PWD}' AS leaked");

        let rendered = SqlTemplateRenderer::new().render(&context).unwrap();
        unsafe {
            std::env::remove_var("QD_RENDER_TEST_PWD");
        }
        assert_eq!(rendered, "SELECT '${env.QD_RENDER_TEST_PWD}' AS leaked");
    }

    #[test]
    fn test_renderer_requires_sql() {
        let context = ExecutionContext::default();
        let err = SqlTemplateRenderer::new().render(&context).unwrap_err();
        assert!(matches!(err, Error::Template(_)));
    }
}
