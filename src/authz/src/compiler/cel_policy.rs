//! CEL-backed policy compiler
//!
//! Every rule of every module is compiled in one pass. References to
//! `data.<path>` are resolved against the full rule set, so a module may use
//! rules declared in any other module of the bundle.

use cel_interpreter::objects::{Key, Value as CelValue};
use cel_interpreter::{Context, Program};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use super::graph::DependencyGraph;
use super::module::PolicyModule;
use super::refs;
use super::result::{QueryResult, ResultSet};
use super::{CompiledPolicy, Input, PolicyCompiler};
use crate::bundle::DocumentStore;
use crate::cel::convert::{cel_to_json, facts_to_cel, insert_path};
use crate::cel::{CelError, Engine};
use crate::error::{AuthzError, CompileError, Result};

/// Ad hoc query programs kept per compiled policy before the cache is reset
const QUERY_CACHE_LIMIT: usize = 1024;

/// Compiles YAML policy modules whose rule bodies are CEL expressions
#[derive(Debug, Clone, Copy, Default)]
pub struct CelCompiler;

impl CelCompiler {
    pub fn new() -> Self {
        Self
    }
}

struct CompiledRule {
    /// Segments below `data`
    segments: Vec<String>,
    /// Module that declared the rule
    module: String,
    source: String,
    program: Program,
}

/// What a `data` reference points at
#[derive(Debug, PartialEq)]
enum Reference {
    /// One rule, or every rule beneath a package prefix
    Rules(Vec<String>),
    /// Static document (possibly absent at evaluation time)
    Document,
    /// Enters a package namespace but names neither a rule nor a document
    Unresolved,
}

#[derive(Debug, Default)]
struct RuleIndex {
    rules: BTreeSet<String>,
    /// Package path to its segment count below `data`
    packages: BTreeMap<String, usize>,
}

impl RuleIndex {
    fn resolve(&self, segments: &[String], documents: &DocumentStore) -> Reference {
        for len in (1..=segments.len()).rev() {
            let candidate = display_path(&segments[..len]);
            if self.rules.contains(&candidate) {
                return Reference::Rules(vec![candidate]);
            }
        }

        let path = display_path(segments);
        let prefix = format!("{}.", path);
        let beneath: Vec<String> = self
            .rules
            .iter()
            .filter(|rule| rule.starts_with(&prefix))
            .cloned()
            .collect();
        if !beneath.is_empty() {
            return Reference::Rules(beneath);
        }

        let package_len = self
            .packages
            .iter()
            .filter(|(package, _)| path.starts_with(&format!("{}.", package)))
            .map(|(_, len)| *len)
            .max();

        match package_len {
            Some(len) if !(len + 1..=segments.len()).any(|n| documents.contains(&segments[..n])) => {
                Reference::Unresolved
            }
            _ => Reference::Document,
        }
    }
}

/// `data` followed by the given segments
fn display_path<S: AsRef<str>>(segments: &[S]) -> String {
    let mut path = String::from("data");
    for segment in segments {
        path.push('.');
        path.push_str(segment.as_ref());
    }
    path
}

impl PolicyCompiler for CelCompiler {
    fn compile(
        &self,
        modules: &BTreeMap<String, String>,
        documents: &DocumentStore,
    ) -> std::result::Result<Arc<dyn CompiledPolicy>, CompileError> {
        let mut errors = CompileError::default();

        let mut parsed = Vec::with_capacity(modules.len());
        for (name, source) in modules {
            match PolicyModule::from_yaml(source) {
                Ok(module) => {
                    let problems = module.validate();
                    if problems.is_empty() {
                        parsed.push((name, module));
                    } else {
                        for problem in problems {
                            errors.push(name.as_str(), problem);
                        }
                    }
                }
                Err(e) => errors.push(name.as_str(), format!("parse error: {}", e)),
            }
        }

        let mut index = RuleIndex::default();
        let mut graph = DependencyGraph::new();
        let mut owners: HashMap<String, String> = HashMap::new();
        let mut rules = BTreeMap::new();

        for (name, module) in &parsed {
            let package = module.package_segments();
            index.packages.insert(module.package_path(), package.len());

            for (rule_name, body) in &module.rules {
                let path = module.rule_path(rule_name);
                if graph.add_rule(path.as_str()).is_err() {
                    let first = owners.get(&path).cloned().unwrap_or_default();
                    errors.push(name.as_str(), format!("rule {} already defined in {}", path, first));
                    continue;
                }
                owners.insert(path.clone(), name.to_string());
                index.rules.insert(path.clone());

                let mut segments = package.clone();
                segments.push(rule_name.clone());
                let shadows_document = (1..=segments.len()).any(|n| match documents.get(&segments[..n]) {
                    Some(value) => n == segments.len() || !value.is_object(),
                    None => false,
                });
                if shadows_document {
                    errors.push(name.as_str(), format!("rule {} conflicts with base document", path));
                }

                let source = body.source();
                match Engine::parse(&source) {
                    Ok(program) => {
                        rules.insert(
                            path,
                            CompiledRule {
                                segments,
                                module: name.to_string(),
                                source,
                                program,
                            },
                        );
                    }
                    Err(e) => errors.push(name.as_str(), format!("rule {}: {}", rule_name, e)),
                }
            }
        }

        for rule in &index.rules {
            let shadows_package = index
                .packages
                .keys()
                .any(|package| package == rule || package.starts_with(&format!("{}.", rule)));
            if shadows_package {
                let owner = owners.get(rule).cloned().unwrap_or_default();
                errors.push(owner, format!("rule {} conflicts with package of the same path", rule));
            }
        }

        for (path, rule) in &rules {
            for reference in refs::data_references(&rule.source) {
                match index.resolve(&reference, documents) {
                    Reference::Rules(targets) => {
                        for target in targets {
                            graph.add_dependency(path, &target);
                        }
                    }
                    Reference::Document => {}
                    Reference::Unresolved => errors.push(
                        rule.module.as_str(),
                        format!("rule {}: undefined reference {}", path, display_path(&reference)),
                    ),
                }
            }
        }

        let order = match graph.resolve_order() {
            Ok(order) => order,
            Err(e) => {
                let message = e.to_string();
                let owner = message
                    .split(": ")
                    .nth(1)
                    .and_then(|cycle| cycle.split(" -> ").next())
                    .and_then(|first| owners.get(first))
                    .cloned()
                    .unwrap_or_default();
                errors.push(owner, message);
                Vec::new()
            }
        };

        errors.into_result()?;

        Ok(Arc::new(CelPolicy {
            rules,
            index,
            graph,
            order,
            queries: Engine::new(),
        }))
    }
}

/// Rules compiled from one bundle
pub struct CelPolicy {
    rules: BTreeMap<String, CompiledRule>,
    index: RuleIndex,
    graph: DependencyGraph,
    /// Topological evaluation order over every rule
    order: Vec<String>,
    /// Cache for ad hoc query expressions
    queries: Engine,
}

impl CelPolicy {
    /// Evaluate the dependency closure of `roots` and return the resulting
    /// `data` tree (documents overlaid with every defined rule value).
    fn evaluate_rules(
        &self,
        context: &mut Context,
        roots: &[String],
        documents: &DocumentStore,
    ) -> Result<CelValue> {
        let mut data = documents.cel_root().clone();
        if roots.is_empty() {
            return Ok(data);
        }

        let needed = self.graph.closure(roots.iter().map(String::as_str));
        for path in self.order.iter().filter(|path| needed.contains(*path)) {
            let Some(rule) = self.rules.get(path) else {
                continue;
            };

            Engine::bind(context, "data", data.clone());
            match Engine::execute(&rule.program, context) {
                Ok(value) => insert_path(&mut data, &rule.segments, value),
                Err(CelError::Undefined(reason)) => {
                    trace!(rule = %path, reason = %reason, "rule is undefined");
                }
                Err(e) => return Err(AuthzError::Evaluation(format!("{}: {}", path, e))),
            }
        }

        Ok(data)
    }

    fn evaluate_reference(&self, query: &str, input: &Input, documents: &DocumentStore) -> Result<ResultSet> {
        let segments = refs::reference_segments(query);
        let roots = match self.index.resolve(&segments, documents) {
            Reference::Rules(targets) => targets,
            Reference::Document | Reference::Unresolved => Vec::new(),
        };

        let mut context = Context::default();
        Engine::bind(&mut context, "input", facts_to_cel(input));
        let data = self.evaluate_rules(&mut context, &roots, documents)?;

        Ok(lookup(&data, &segments)
            .map(|value| vec![QueryResult::single(query, cel_to_json(value))])
            .unwrap_or_default())
    }

    fn evaluate_expression(&self, query: &str, input: &Input, documents: &DocumentStore) -> Result<ResultSet> {
        if self.queries.cached_programs() >= QUERY_CACHE_LIMIT {
            self.queries.clear_cache();
        }
        let program = self
            .queries
            .compile(query)
            .map_err(|e| AuthzError::Evaluation(format!("malformed query '{}': {}", query, e)))?;

        let mut roots = Vec::new();
        for reference in refs::data_references(query) {
            match self.index.resolve(&reference, documents) {
                Reference::Rules(targets) => roots.extend(targets),
                Reference::Document => {}
                Reference::Unresolved => {
                    return Err(AuthzError::Evaluation(format!(
                        "undefined reference {} in query",
                        display_path(&reference)
                    )))
                }
            }
        }

        let mut context = Context::default();
        Engine::bind(&mut context, "input", facts_to_cel(input));
        let data = self.evaluate_rules(&mut context, &roots, documents)?;
        Engine::bind(&mut context, "data", data);

        match Engine::execute(&program, &context) {
            Ok(value) => Ok(vec![QueryResult::single(query, cel_to_json(&value))]),
            Err(CelError::Undefined(_)) => Ok(Vec::new()),
            Err(e) => Err(AuthzError::Evaluation(e.to_string())),
        }
    }
}

fn lookup<'v>(root: &'v CelValue, segments: &[String]) -> Option<&'v CelValue> {
    segments.iter().try_fold(root, |node, segment| match node {
        CelValue::Map(map) => map.map.get(&Key::from(segment.clone())),
        _ => None,
    })
}

impl CompiledPolicy for CelPolicy {
    fn evaluate(&self, query: &str, input: &Input, documents: &DocumentStore) -> Result<ResultSet> {
        let query = query.trim();
        if refs::is_plain_reference(query) {
            self.evaluate_reference(query, input, documents)
        } else {
            self.evaluate_expression(query, input, documents)
        }
    }

    fn rule_paths(&self) -> Vec<String> {
        self.rules.keys().cloned().collect()
    }
}

impl fmt::Debug for CelPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CelPolicy")
            .field("rules", &self.order)
            .field("cached_queries", &self.queries.cached_programs())
            .finish()
    }
}
