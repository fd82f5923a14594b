use std::{io::Write, path::PathBuf, process::ExitCode, rc::Rc, time::Duration};

use clap::{Args, Parser, Subcommand};
use hostscript::{
    compilation::{CompileError, CompileErrorKind},
    span::Position,
    token::TokenKind,
    CompiledExpression, HostRegistry, Limits, Script, TypeSystem,
};

#[derive(Debug, Parser)]
#[command(name = "hostscript", about = "Run and inspect hostscript programs")]
struct Cli {
    /// More log output; repeat for more detail.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

impl Cli {
    pub fn command(&self) -> &Command {
        self.command.as_ref().unwrap_or(&Command::Repl)
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compile a script, prepare its declarations and call an entry point.
    Run(RunArgs),
    /// Evaluate a single expression.
    Eval(EvalArgs),
    /// Print the tokens of a file.
    Tokens(TokensArgs),
    /// Evaluate expressions line by line.
    Repl,
}

#[derive(Debug, Args)]
struct RunArgs {
    file: PathBuf,
    #[arg(long, default_value = "Main")]
    entry: String,
    #[arg(long)]
    max_steps: Option<u64>,
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Args)]
struct EvalArgs {
    expression: String,
}

#[derive(Debug, Args)]
struct TokensArgs {
    file: PathBuf,
}

#[derive(Debug, thiserror::Error)]
enum InterpretError {
    #[error(transparent)]
    Script(#[from] hostscript::Error),
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<hostscript::compilation::CompileError> for InterpretError {
    fn from(error: hostscript::compilation::CompileError) -> Self {
        Self::Script(error.into())
    }
}

impl From<hostscript::RuntimeError> for InterpretError {
    fn from(error: hostscript::RuntimeError) -> Self {
        Self::Script(error.into())
    }
}

impl From<hostscript::tokenizer::TokenizeError> for InterpretError {
    fn from(error: hostscript::tokenizer::TokenizeError) -> Self {
        Self::Script(error.into())
    }
}

fn setup_logging(verbose: u8, quiet: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    let formatter = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_level(true);

    tracing_subscriber::registry()
        .with(formatter)
        .with(filter)
        .init();
}

fn main() -> ExitCode {
    let args = Cli::parse();
    setup_logging(args.verbose, args.quiet);

    let types: Rc<dyn TypeSystem> = Rc::new(HostRegistry::new());
    let result = match args.command() {
        Command::Run(args) => run_command(args, types),
        Command::Eval(args) => eval_command(&args.expression, types),
        Command::Tokens(args) => tokens_command(args, types.as_ref()),
        Command::Repl => repl_command(types),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn read_source(path: &PathBuf) -> Result<String, InterpretError> {
    std::fs::read_to_string(path).map_err(|source| InterpretError::Read {
        path: path.clone(),
        source,
    })
}

fn run_command(args: &RunArgs, types: Rc<dyn TypeSystem>) -> Result<(), InterpretError> {
    let source = read_source(&args.file)?;
    let script = Script::compile(&source, types)?;
    if !script
        .overloads(&args.entry)
        .any(|signature| signature.parameters.is_empty())
    {
        return Err(CompileError::new(
            CompileErrorKind::MissingFunction(format!("{}()", args.entry)),
            Position::default(),
        )
        .into());
    }

    let mut limits = Limits::default();
    if let Some(steps) = args.max_steps {
        limits = limits.with_max_steps(steps);
    }
    if let Some(timeout) = args.timeout_ms {
        limits = limits.with_timeout(Duration::from_millis(timeout));
    }

    let mut context = script.new_context().with_limits(limits);
    script.prepare(&mut context)?;
    if let Some(value) = script.call(&args.entry, &mut context, &[])? {
        println!("{}", value);
    }
    Ok(())
}

fn eval_command(source: &str, types: Rc<dyn TypeSystem>) -> Result<(), InterpretError> {
    let expression = CompiledExpression::compile(source, types, &[])?;
    let mut context = expression.new_context();
    println!("{}", expression.evaluate(&mut context)?);
    Ok(())
}

fn category(kind: &TokenKind) -> &'static str {
    match kind {
        TokenKind::Keyword(_) => "Keyword",
        TokenKind::Type(_) => "Type",
        TokenKind::Identifier(_) => "Identifier",
        TokenKind::Operator(_) => "Operator",
        TokenKind::Separator(_) => "Separator",
        TokenKind::Literal(_) => "Literal",
        TokenKind::Interpolated(_) => "Interpolated",
        TokenKind::Eof => "Eof",
    }
}

fn tokens_command(args: &TokensArgs, types: &dyn TypeSystem) -> Result<(), InterpretError> {
    let source = read_source(&args.file)?;
    let tokens = hostscript::tokenizer::tokenize(&source, types)?;

    let mut line = 0;
    for token in tokens {
        if token.position.line != line {
            print!("{:4} ", token.position.line);
            line = token.position.line;
        } else {
            print!("   | ");
        }
        println!("{:<12} {}", category(&token.kind), token.kind);
    }
    Ok(())
}

fn repl_command(types: Rc<dyn TypeSystem>) -> Result<(), InterpretError> {
    println!("Welcome to the hostscript REPL!");
    println!("Enter an expression. EOF to exit. (Ctrl+D on *nix, Ctrl+Z on Windows)");

    let mut input = String::new();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        input.clear();
        if std::io::stdin().read_line(&mut input)? == 0 {
            break;
        }

        let source = input.trim();
        if source.is_empty() {
            continue;
        }
        if let Err(e) = eval_command(source, types.clone()) {
            println!("Error: {}", e);
        }
    }
    Ok(())
}
