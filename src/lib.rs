pub mod ast;
pub mod compilation;
pub mod format;
pub mod interpreter;
pub mod parser;
pub mod registry;
pub mod script;
pub mod span;
pub mod token;
pub mod tokenizer;
pub mod types;
pub mod value;

pub use ast::FunctionSignature;
pub use interpreter::{
    context::{GlobalContext, RuntimeContext},
    monitor::{ExecutionMonitor, Limits, DEFAULT_MAX_CALL_DEPTH},
    RuntimeError,
};
pub use registry::HostRegistry;
pub use script::{CompiledExpression, Script};
pub use types::{ScriptType, TypeSystem};
pub use value::Value;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Tokenize(#[from] tokenizer::TokenizeError),
    #[error(transparent)]
    Compile(#[from] compilation::CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
