//! CEL expression engine with compiled program caching

use cel_interpreter::objects::Value as CelValue;
use cel_interpreter::{Context, ExecutionError, Program};
use dashmap::DashMap;
use std::sync::Arc;

use crate::cel::error::{CelError, Result};

/// CEL engine for compiling and evaluating expressions
#[derive(Default)]
pub struct Engine {
    /// Compiled program cache (thread-safe)
    program_cache: DashMap<String, Arc<Program>>,
}

impl Engine {
    /// Create a new CEL engine
    pub fn new() -> Self {
        Self {
            program_cache: DashMap::new(),
        }
    }

    /// Compile an expression without touching the cache
    pub fn parse(expr: &str) -> Result<Program> {
        Program::compile(expr).map_err(|e| CelError::CompilationError(e.to_string()))
    }

    /// Compile a CEL expression and cache the result
    ///
    /// # Errors
    /// Returns error if expression cannot be compiled
    pub fn compile(&self, expr: &str) -> Result<Arc<Program>> {
        if let Some(prog) = self.program_cache.get(expr) {
            return Ok(prog.clone());
        }

        let program = Arc::new(Self::parse(expr)?);
        self.program_cache
            .insert(expr.to_string(), program.clone());

        Ok(program)
    }

    /// Bind (or rebind) a variable in an evaluation context
    pub fn bind(context: &mut Context, name: &str, value: CelValue) {
        context.add_variable_from_value(name, value);
    }

    /// Execute a program against a context.
    ///
    /// Missing keys and undeclared references surface as [`CelError::Undefined`].
    pub fn execute(program: &Program, context: &Context) -> Result<CelValue> {
        program.execute(context).map_err(classify)
    }

    /// Number of cached programs
    pub fn cached_programs(&self) -> usize {
        self.program_cache.len()
    }

    /// Clear the compiled program cache
    pub fn clear_cache(&self) {
        self.program_cache.clear();
    }
}

fn classify(err: ExecutionError) -> CelError {
    match err {
        ExecutionError::NoSuchKey(key) => CelError::Undefined(format!("no such key: {}", key)),
        ExecutionError::UndeclaredReference(name) => {
            CelError::Undefined(format!("undeclared reference to '{}'", name))
        }
        other => CelError::EvaluationError(other.to_string()),
    }
}
