use clap::Parser;
use lispp::ast::Expr;
use lispp::evaluator::{self, Binding, Environment};
use lispp::printer::{cprint, escape, print};
use lispp::reader::{read, read_all};
use lispp::{Error, ParseErrorKind};
use log::{debug, warn};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::path::{Path, PathBuf};
use std::{env, fs, process, thread};

/// Evaluation depth granted per megabyte of worker stack
const EVAL_DEPTH_PER_MB: usize = 8;

const DEFAULT_STACK_MB: usize = 256;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Script evaluated in the root environment before anything else (repeatable)
    #[arg(short, long = "load", value_name = "FILE")]
    load: Vec<PathBuf>,

    /// Evaluate these forms, print the results and exit instead of starting the REPL
    #[arg(short, long, value_name = "EXPR")]
    eval: Option<String>,

    /// Echo results without ANSI colours
    #[arg(long)]
    no_color: bool,

    /// History file for the line editor [env: LISPP_HISTORY]
    #[arg(long, value_name = "FILE")]
    history: Option<PathBuf>,

    /// Arguments exposed to scripts as the `@` list
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

/// How results are echoed
#[derive(Debug, Clone, Copy)]
struct Echo {
    color: bool,
}

impl Echo {
    fn render(self, expr: &Expr) -> String {
        if self.color { cprint(expr) } else { print(expr) }
    }
}

fn stack_mb() -> Result<usize, String> {
    match env::var("LISPP_STACK_MB") {
        Ok(v) => v
            .trim()
            .parse::<usize>()
            .map_err(|_| format!("invalid LISPP_STACK_MB: {v}")),
        Err(env::VarError::NotPresent) => Ok(DEFAULT_STACK_MB),
        Err(e) => Err(format!("invalid LISPP_STACK_MB: {e}")),
    }
}

fn history_path(cli: &Cli) -> PathBuf {
    if let Some(path) = &cli.history {
        return path.clone();
    }
    if let Some(path) = env::var_os("LISPP_HISTORY") {
        return PathBuf::from(path);
    }
    match env::var_os("HOME") {
        Some(home) => Path::new(&home).join(".lispp_history"),
        None => PathBuf::from(".lispp_history"),
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let mut argv: Vec<String> = env::args().take(1).collect();
    argv.extend(cli.args.iter().cloned());

    let stack_mb = match stack_mb() {
        Ok(mb) => mb,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };
    let Some(stack_size) = stack_mb.checked_mul(1024 * 1024) else {
        eprintln!("error: invalid LISPP_STACK_MB: {stack_mb}");
        process::exit(1);
    };
    debug!("evaluator stack: {stack_mb} MB");

    let result = thread::Builder::new()
        .name("lispp-eval".to_owned())
        .stack_size(stack_size)
        .spawn(move || {
            evaluator::set_max_eval_depth(stack_mb.saturating_mul(EVAL_DEPTH_PER_MB).max(16));
            run(&cli, &argv)
        })
        .map_err(|e| format!("failed to start evaluator thread: {e}"))
        .and_then(|handle| {
            handle
                .join()
                .map_err(|_| "The REPL encountered an unexpected error and must exit.".to_owned())
        });

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    }
}

/// Run the whole session and return the process exit code
fn run(cli: &Cli, argv: &[String]) -> i32 {
    let echo = Echo {
        color: !cli.no_color,
    };
    let env = evaluator::create_root_env(argv);
    env.register_builtin_operation::<(), _>("help", &[], print_help);

    for path in &cli.load {
        if let Err(err) = load_script(&env, path) {
            println!("> {}", echo.render(&error_form(&err)));
            return 1;
        }
    }

    if let Some(source) = &cli.eval {
        return match eval_source(&env, source) {
            Ok(values) => {
                for value in values {
                    println!("{}", echo.render(&value));
                }
                0
            }
            Err(err) => {
                println!("> {}", echo.render(&error_form(&err)));
                1
            }
        };
    }

    run_repl(&env, echo, &history_path(cli));
    0
}

fn load_script(env: &Environment, path: &Path) -> Result<(), Error> {
    let source = fs::read_to_string(path).map_err(|e| {
        Error::EvalError(format!("could not open file '{}': {e}", path.display()))
    })?;
    debug!("loading '{}'", path.display());
    eval_source(env, &source).map(|_| ())
}

fn eval_source(env: &Environment, source: &str) -> Result<Vec<Expr>, Error> {
    read_all(source)?
        .iter()
        .map(|form| evaluator::eval(form, env))
        .collect()
}

/// An error as data: `(err "message")`
fn error_form(err: &Error) -> Expr {
    let message = escape(&err.message());
    match read(&format!("(err \"{message}\")")) {
        Ok(Some(form)) => form,
        _ => Expr::List(vec![Expr::Symbol("err".to_owned()), Expr::String(message)]),
    }
}

fn is_incomplete(err: &Error) -> bool {
    matches!(err, Error::ParseError(e) if e.kind == ParseErrorKind::Incomplete)
}

fn run_repl(env: &Environment, echo: Echo, history: &Path) {
    println!("Welcome to lispp v{}.", env!("CARGO_PKG_VERSION"));
    println!("Type :help for more commands, or Ctrl+D to exit.");
    println!();

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Could not initialize REPL: {e}");
            return;
        }
    };
    if let Err(e) = rl.load_history(history) {
        debug!("no history loaded from '{}': {e}", history.display());
    }

    // holds the lines of a form that is still open
    let mut pending = String::new();

    loop {
        let prompt = if pending.is_empty() { "> " } else { ". " };
        match rl.readline(prompt) {
            Ok(line) => {
                if pending.is_empty() {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    remember(&mut rl, trimmed);
                    match trimmed {
                        ":help" => {
                            print_help();
                            continue;
                        }
                        ":env" => {
                            print_environment(env);
                            continue;
                        }
                        ":quit" | ":exit" => {
                            println!("Goodbye!");
                            break;
                        }
                        _ => {}
                    }
                } else {
                    remember(&mut rl, line.trim());
                    pending.push('\n');
                }
                pending.push_str(&line);

                match read_all(&pending) {
                    Err(err) if is_incomplete(&err) => continue,
                    Err(err) => println!("> {}", echo.render(&error_form(&err))),
                    Ok(forms) => evaluate_forms(env, &forms, echo),
                }
                pending.clear();
            }
            Err(ReadlineError::Interrupted) if !pending.is_empty() => pending.clear(),
            Err(ReadlineError::Eof | ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }

    if let Err(e) = rl.save_history(history) {
        warn!("could not save history to '{}': {e}", history.display());
    }
}

fn remember(rl: &mut DefaultEditor, line: &str) {
    if let Err(e) = rl.add_history_entry(line) {
        debug!("could not add history entry: {e}");
    }
}

/// Echo and evaluate each form; the first error ends the line
fn evaluate_forms(env: &Environment, forms: &[Expr], echo: Echo) {
    for form in forms {
        println!("< {}", echo.render(form));
        match evaluator::eval(form, env) {
            Ok(value) => println!("> {}", echo.render(&value)),
            Err(err) => {
                println!("> {}", echo.render(&error_form(&err)));
                break;
            }
        }
    }
}

fn print_help() -> Expr {
    println!("lispp, a small lazy Lisp:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show root environment bindings");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+D     - Exit the interpreter");
    println!();
    println!("Examples:");
    println!("  (+ 1 2)                          ; 3");
    println!("  (/ 1 3)                          ; 1/3");
    println!("  (let sq (fn (x) (* x x)))        ; constant binding");
    println!("  (map sq '(1 2 3))                ; (1 4 9)");
    println!("  (if F (throw \"boom\") 'lazy)      ; lazy");
    println!("  (try (throw \"e\") (fn (m) m))     ; \"e\"");
    println!("  (<< (fmt \"~s!\\n\" 'hi))            ; prints hi!");
    println!();
    Expr::Symbol("T".to_owned())
}

fn print_environment(env: &Environment) {
    let bindings = env.get_all_bindings();

    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    println!("Environment bindings ({} total):", bindings.len());
    println!();

    let (functions, values): (Vec<(String, Binding)>, Vec<(String, Binding)>) = bindings
        .into_iter()
        .partition(|(_, binding)| matches!(binding.raw(), Expr::Function(_)));

    if !functions.is_empty() {
        println!("Functions ({}):", functions.len());
        let mut col = 0;
        for (name, _) in &functions {
            print!("  {name:<12}");
            col += 1;
            if col % 5 == 0 {
                println!();
            }
        }
        if col % 5 != 0 {
            println!();
        }
        println!();
    }

    if !values.is_empty() {
        println!("Values ({}):", values.len());
        for (name, binding) in &values {
            let state = if binding.is_forced() { "" } else { " (unforced)" };
            println!("  {name} = {}{state}", print(binding.raw()));
        }
    }
}
