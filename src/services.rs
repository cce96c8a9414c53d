//! Collaborators consumed by the execution core
//!
//! Parsing, content scanning, trust classification, parameter metadata, code
//! generation and event reporting are reached through these narrow traits so
//! hosts and tests can substitute their own.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::compiler::{ClosureCompiler, CodeGenerator, Tier};
use crate::config::Config;
use crate::errors::ScriptError;
use crate::parser;
use crate::session::AllScopeNames;
use crate::types::{AttributeAst, Clause, Expr, ScriptAst};

/* ===================== Traits ===================== */

pub trait ScriptParser: Send + Sync {
    fn parse(&self, source: &str) -> Result<ScriptAst, ScriptError>;
}

/// Result of scanning script text for risky content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanVerdict {
    Clean,
    /// Compilation must be refused
    Blocked(String),
    /// Allowed, but marked suspicious
    Flagged,
}

pub trait ContentScanner: Send + Sync {
    fn scan(&self, text: &str) -> ScanVerdict;
}

pub trait TrustClassifier: Send + Sync {
    fn is_trusted(&self, origin: &str) -> bool;
}

pub trait ParameterResolver: Send + Sync {
    fn resolve(&self, ast: &ScriptAst) -> ScriptMetadata;
}

/// Observational hooks; return values are never consumed
pub trait EventSink: Send + Sync {
    fn compile_started(&self, script: Uuid, tier: Tier);
    fn compile_finished(&self, script: Uuid, tier: Tier, success: bool);
    fn invocation_started(&self, script: Uuid, clause: Clause);
    fn invocation_finished(&self, script: Uuid, clause: Clause, success: bool);
}

/* ===================== Metadata ===================== */

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterMetadata {
    pub name: String,
    pub position: usize,
    pub has_default: bool,
    pub attributes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScriptMetadata {
    pub parameters: Vec<ParameterMetadata>,
    pub attributes: Vec<AttributeAst>,
    pub uses_advanced_binding: bool,
}

/* ===================== Services ===================== */

/// The full set of collaborators an engine runs with
#[derive(Clone)]
pub struct Services {
    pub parser: Arc<dyn ScriptParser>,
    pub scanner: Arc<dyn ContentScanner>,
    pub trust: Arc<dyn TrustClassifier>,
    pub resolver: Arc<dyn ParameterResolver>,
    pub codegen: Arc<dyn CodeGenerator>,
    pub events: Arc<dyn EventSink>,
    /// Shared by every script the engine compiles
    pub all_scope: Arc<AllScopeNames>,
}

impl Services {
    /// Default collaborators configured from `config.security`
    pub fn from_config(config: &Config) -> Self {
        Self {
            parser: Arc::new(PestScriptParser),
            scanner: Arc::new(PatternScanner::new(
                config.security.blocked_patterns.clone(),
                config.security.flagged_patterns.clone(),
            )),
            trust: Arc::new(OriginPrefixTrust::new(
                config.security.trusted_origins.clone(),
            )),
            resolver: Arc::new(AstParameterResolver),
            codegen: Arc::new(ClosureCompiler),
            events: Arc::new(TracingEventSink),
            all_scope: Arc::new(AllScopeNames::default()),
        }
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

/* ===================== Default Implementations ===================== */

#[derive(Debug, Default)]
pub struct PestScriptParser;

impl ScriptParser for PestScriptParser {
    fn parse(&self, source: &str) -> Result<ScriptAst, ScriptError> {
        Ok(parser::parse_script(source)?)
    }
}

/// Case-insensitive substring matching
#[derive(Debug, Default)]
pub struct PatternScanner {
    blocked: Vec<String>,
    flagged: Vec<String>,
}

impl PatternScanner {
    pub fn new(blocked: Vec<String>, flagged: Vec<String>) -> Self {
        Self {
            blocked: blocked.iter().map(|p| p.to_lowercase()).collect(),
            flagged: flagged.iter().map(|p| p.to_lowercase()).collect(),
        }
    }
}

impl ContentScanner for PatternScanner {
    fn scan(&self, text: &str) -> ScanVerdict {
        let text = text.to_lowercase();
        if let Some(pattern) = self.blocked.iter().find(|p| text.contains(p.as_str())) {
            return ScanVerdict::Blocked(format!("matched blocked pattern '{}'", pattern));
        }
        if self.flagged.iter().any(|p| text.contains(p.as_str())) {
            return ScanVerdict::Flagged;
        }
        ScanVerdict::Clean
    }
}

#[derive(Debug, Default)]
pub struct OriginPrefixTrust {
    prefixes: Vec<String>,
}

impl OriginPrefixTrust {
    pub fn new(prefixes: Vec<String>) -> Self {
        Self { prefixes }
    }
}

impl TrustClassifier for OriginPrefixTrust {
    fn is_trusted(&self, origin: &str) -> bool {
        self.prefixes.iter().any(|p| origin.starts_with(p.as_str()))
    }
}

/// Reads the param block. Advanced binding is a `CmdletBinding` script
/// attribute or a `Parameter` attribute on any parameter.
#[derive(Debug, Default)]
pub struct AstParameterResolver;

impl ParameterResolver for AstParameterResolver {
    fn resolve(&self, ast: &ScriptAst) -> ScriptMetadata {
        let parameters: Vec<ParameterMetadata> = ast
            .params
            .iter()
            .enumerate()
            .map(|(position, p)| ParameterMetadata {
                name: p.name.clone(),
                position,
                has_default: p.default.is_some(),
                attributes: p.attributes.iter().map(|a| a.name.clone()).collect(),
            })
            .collect();

        let uses_advanced_binding = ast.has_attribute("CmdletBinding")
            || parameters.iter().any(|p| {
                p.attributes
                    .iter()
                    .any(|a| a.eq_ignore_ascii_case("Parameter"))
            });

        ScriptMetadata {
            parameters,
            attributes: ast.attributes.clone(),
            uses_advanced_binding,
        }
    }
}

#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn compile_started(&self, script: Uuid, tier: Tier) {
        debug!(%script, ?tier, "Compile started");
    }

    fn compile_finished(&self, script: Uuid, tier: Tier, success: bool) {
        if success {
            debug!(%script, ?tier, "Compile finished");
        } else {
            warn!(%script, ?tier, "Compile failed");
        }
    }

    fn invocation_started(&self, script: Uuid, clause: Clause) {
        debug!(%script, clause = clause.name(), "Invocation started");
    }

    fn invocation_finished(&self, script: Uuid, clause: Clause, success: bool) {
        if success {
            debug!(%script, clause = clause.name(), "Invocation finished");
        } else {
            info!(%script, clause = clause.name(), "Invocation failed");
        }
    }
}

/// Render an attribute argument for display (`Mandatory = True`)
pub fn describe_attribute(attr: &AttributeAst) -> String {
    let args: Vec<String> = attr
        .args
        .iter()
        .map(|arg| {
            let value = match &arg.value {
                Expr::LitBool { v, .. } => if *v { "$true" } else { "$false" }.to_string(),
                Expr::LitNum { v, .. } => v.to_string(),
                Expr::LitStr { v, .. } => format!("'{}'", v),
                _ => "...".to_string(),
            };
            match &arg.name {
                Some(name) => format!("{} = {}", name, value),
                None => value,
            }
        })
        .collect();
    format!("[{}({})]", attr.name, args.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_scanner_is_case_insensitive() {
        let scanner = PatternScanner::new(vec!["Format-Disk".into()], vec!["invoke-expression".into()]);

        assert!(matches!(scanner.scan("format-disk(1)"), ScanVerdict::Blocked(_)));
        assert_eq!(scanner.scan("Invoke-Expression('x')"), ScanVerdict::Flagged);
        assert_eq!(scanner.scan("Write-Output(1)"), ScanVerdict::Clean);
    }

    #[test]
    fn test_origin_prefix_trust() {
        let trust = OriginPrefixTrust::new(vec!["/opt/product/".into()]);
        assert!(trust.is_trusted("/opt/product/init.tempo"));
        assert!(!trust.is_trusted("/home/user/init.tempo"));
    }

    #[test]
    fn test_resolver_detects_advanced_binding() {
        let plain = parser::parse_script("param($a, $b = 1) $a").unwrap();
        let meta = AstParameterResolver.resolve(&plain);
        assert!(!meta.uses_advanced_binding);
        assert_eq!(meta.parameters.len(), 2);
        assert!(meta.parameters[1].has_default);

        let advanced = parser::parse_script("param([Parameter()] $a) $a").unwrap();
        assert!(AstParameterResolver.resolve(&advanced).uses_advanced_binding);

        let cmdlet = parser::parse_script("[CmdletBinding()] param($a) $a").unwrap();
        assert!(AstParameterResolver.resolve(&cmdlet).uses_advanced_binding);
    }

    #[test]
    fn test_describe_attribute() {
        let ast = parser::parse_script("[Alias('x', Mandatory = $true)] $a").unwrap();
        assert_eq!(
            describe_attribute(&ast.attributes[0]),
            "[Alias('x', Mandatory = $true)]"
        );
    }
}
