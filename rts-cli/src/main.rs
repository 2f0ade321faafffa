mod config;
mod host;
mod logging;

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use script::{
    Ctx, Engine, GlobalVar, Limits, Pos, RequestSnapshot, Runtime, ScriptError, Use, Value,
    render_error,
};
use tracing::debug;

use crate::host::{RecordingHost, Write};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct CliConfig {
    source: Option<String>,
    expr: Option<String>,
    repl: bool,
    uses: Vec<(String, Option<String>)>,
    vars: Vec<(String, String)>,
    env: Vec<(String, String)>,
    globals: Vec<(String, String)>,
    method: Option<String>,
    url: Option<String>,
    headers: Vec<(String, String)>,
    body: Option<String>,
    base_dir: Option<PathBuf>,
    allow_random: bool,
    max_string: Option<usize>,
    max_list: Option<usize>,
    max_dict: Option<usize>,
    max_depth: Option<usize>,
    max_nesting: Option<usize>,
    config: Option<PathBuf>,
    verbose: bool,
    help: bool,
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("{}: {err}", logging::error_label());
            ExitCode::from(2)
        }
    }
}

/// Returns `Ok(false)` when the script itself failed.
fn run(args: &[String]) -> Result<bool, Box<dyn std::error::Error>> {
    let cli = parse_cli_args(args).map_err(io::Error::other)?;
    if cli.help {
        print_usage();
        return Ok(true);
    }
    logging::init(cli.verbose)?;

    let file_config = match &cli.config {
        Some(path) => config::load(path).map_err(io::Error::other)?,
        None => config::FileConfig::default(),
    };
    let settings = Settings::new(&cli, &file_config)?;
    debug!(
        "cli settings base_dir={} allow_random={} limits={:?}",
        settings.base_dir.display(),
        settings.allow_random,
        settings.limits
    );

    let host = RecordingHost::new(
        request_from(&cli),
        to_values(&cli.vars),
        to_globals(&cli.globals),
    );
    let engine = Engine::new();

    if cli.repl {
        run_repl(&engine, &settings, &host)?;
        return Ok(true);
    }

    let (label, source, inline) = match (&cli.expr, &cli.source) {
        (Some(expr), _) => ("<expr>".to_string(), expr.clone(), true),
        (None, Some(path)) => {
            let source = std::fs::read_to_string(path)
                .map_err(|err| io::Error::other(format!("cannot read '{path}': {err}")))?;
            (path.clone(), source, false)
        }
        (None, None) => {
            return Err(io::Error::other("nothing to run; pass a file or -e <expr>").into());
        }
    };

    let mut ctx = settings.ctx();
    let runtime = host.bind(settings.runtime());
    let start = Pos::new(label.as_str(), 1, 1);
    let result = if inline {
        engine.eval_expr(&mut ctx, &runtime, &source, &start)
    } else {
        engine.eval(&mut ctx, &runtime, &source, &start)
    };
    match result {
        Ok(value) => {
            println!("{value}");
            print_host_state(&host, cli.url.is_some() || cli.method.is_some());
            Ok(true)
        }
        Err(err) => {
            eprintln!("{}", render(&err, &label, &source));
            print_host_state(&host, false);
            Ok(false)
        }
    }
}

/// Effective settings after the config file and flags are merged.
struct Settings {
    limits: Limits,
    allow_random: bool,
    base_dir: PathBuf,
    env: BTreeMap<String, String>,
    uses: Vec<Use>,
}

impl Settings {
    fn new(cli: &CliConfig, file: &config::FileConfig) -> Result<Self, io::Error> {
        let flags = config::LimitsConfig {
            max_string: cli.max_string,
            max_list: cli.max_list,
            max_dict: cli.max_dict,
            max_depth: cli.max_depth,
            max_nesting: cli.max_nesting,
        };
        let limits = flags.apply(file.limits.apply(Limits::default()));
        let base_dir = match (&cli.base_dir, &cli.source) {
            (Some(dir), _) => dir.clone(),
            (None, Some(source)) => match Path::new(source).parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => std::env::current_dir()?,
            },
            (None, None) => std::env::current_dir()?,
        };
        let uses = cli
            .uses
            .iter()
            .enumerate()
            .map(|(idx, (path, alias))| {
                let directive = Use::new(path.as_str(), Pos::new("--use", idx as u32 + 1, 1));
                match alias {
                    Some(alias) => directive.with_alias(alias.as_str()),
                    None => directive,
                }
            })
            .collect();
        Ok(Self {
            limits,
            allow_random: cli.allow_random || file.allow_random.unwrap_or(false),
            base_dir,
            env: cli.env.iter().cloned().collect(),
            uses,
        })
    }

    fn ctx(&self) -> Ctx {
        Ctx::new()
            .with_limits(self.limits)
            .allow_random(self.allow_random)
            .with_base_dir(self.base_dir.clone())
    }

    fn runtime(&self) -> Runtime {
        let mut runtime = Runtime::new().with_base_dir(self.base_dir.clone());
        runtime.env = self.env.clone();
        runtime.uses = self.uses.clone();
        runtime
    }
}

fn parse_cli_args(args: &[String]) -> Result<CliConfig, String> {
    let mut cfg = CliConfig::default();
    let mut index = 0usize;

    if args.first().is_some_and(|first| first == "repl") {
        cfg.repl = true;
        index = 1;
    }

    while index < args.len() {
        let flag = args[index].as_str();
        let value = || {
            args.get(index + 1)
                .cloned()
                .ok_or_else(|| format!("missing value for {flag}"))
        };
        match flag {
            "-h" | "--help" => {
                cfg.help = true;
                index += 1;
            }
            "-v" | "--verbose" => {
                cfg.verbose = true;
                index += 1;
            }
            "--allow-random" => {
                cfg.allow_random = true;
                index += 1;
            }
            "-e" | "--expr" => {
                cfg.expr = Some(value()?);
                index += 2;
            }
            "--use" => {
                cfg.uses.push(parse_use(&value()?));
                index += 2;
            }
            "--var" => {
                cfg.vars.push(parse_pair(flag, &value()?)?);
                index += 2;
            }
            "--env" => {
                cfg.env.push(parse_pair(flag, &value()?)?);
                index += 2;
            }
            "--global" => {
                cfg.globals.push(parse_pair(flag, &value()?)?);
                index += 2;
            }
            "--method" => {
                cfg.method = Some(value()?.to_ascii_uppercase());
                index += 2;
            }
            "--url" => {
                cfg.url = Some(value()?);
                index += 2;
            }
            "--header" => {
                let raw = value()?;
                let (name, header_value) = raw
                    .split_once(':')
                    .ok_or_else(|| format!("invalid --header '{raw}', expected 'Name: value'"))?;
                cfg.headers
                    .push((name.trim().to_string(), header_value.trim().to_string()));
                index += 2;
            }
            "--body" => {
                cfg.body = Some(value()?);
                index += 2;
            }
            "--base-dir" => {
                cfg.base_dir = Some(PathBuf::from(value()?));
                index += 2;
            }
            "--config" => {
                cfg.config = Some(PathBuf::from(value()?));
                index += 2;
            }
            "--max-string" => {
                cfg.max_string = Some(parse_limit(flag, &value()?)?);
                index += 2;
            }
            "--max-list" => {
                cfg.max_list = Some(parse_limit(flag, &value()?)?);
                index += 2;
            }
            "--max-dict" => {
                cfg.max_dict = Some(parse_limit(flag, &value()?)?);
                index += 2;
            }
            "--max-depth" => {
                cfg.max_depth = Some(parse_limit(flag, &value()?)?);
                index += 2;
            }
            "--max-nesting" => {
                cfg.max_nesting = Some(parse_limit(flag, &value()?)?);
                index += 2;
            }
            other if other.starts_with('-') => {
                return Err(format!("unknown flag '{other}'"));
            }
            path => {
                if cfg.source.is_some() {
                    return Err("multiple source paths provided".to_string());
                }
                cfg.source = Some(path.to_string());
                index += 1;
            }
        }
    }

    if cfg.repl && (cfg.source.is_some() || cfg.expr.is_some()) {
        return Err("repl does not take a source path or -e".to_string());
    }
    Ok(cfg)
}

fn parse_pair(flag: &str, raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("invalid {flag} '{raw}', expected name=value")),
    }
}

/// `path` or `path=alias`. A trailing segment that is not an identifier is
/// kept as part of the path.
fn parse_use(raw: &str) -> (String, Option<String>) {
    if let Some((path, alias)) = raw.rsplit_once('=')
        && !path.is_empty()
        && alias
            .chars()
            .next()
            .is_some_and(|ch| ch.is_ascii_alphabetic() || ch == '_')
        && alias.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    {
        return (path.to_string(), Some(alias.to_string()));
    }
    (raw.to_string(), None)
}

fn parse_limit(flag: &str, raw: &str) -> Result<usize, String> {
    raw.parse::<usize>()
        .map_err(|_| format!("invalid {flag} value '{raw}'"))
}

fn request_from(cli: &CliConfig) -> Option<RequestSnapshot> {
    if cli.url.is_none() && cli.method.is_none() {
        return None;
    }
    let mut request = RequestSnapshot::new(
        cli.method.clone().unwrap_or_else(|| "GET".to_string()),
        cli.url.clone().unwrap_or_default(),
    );
    for (name, value) in &cli.headers {
        request = request.with_header(name.as_str(), value.as_str());
    }
    if let Some(body) = &cli.body {
        request = request.with_body(body.as_str());
    }
    Some(request)
}

fn to_values(pairs: &[(String, String)]) -> BTreeMap<String, Value> {
    pairs
        .iter()
        .map(|(name, value)| (name.clone(), Value::from(value.as_str())))
        .collect()
}

fn to_globals(pairs: &[(String, String)]) -> BTreeMap<String, GlobalVar> {
    pairs
        .iter()
        .map(|(name, value)| (name.clone(), GlobalVar::new(value.as_str())))
        .collect()
}

fn render(err: &ScriptError, label: &str, source: &str) -> String {
    let file_source = match err.pos() {
        Some(pos) if pos.path() == label => Some(source.to_string()),
        Some(pos) => std::fs::read_to_string(pos.path()).ok(),
        None => None,
    };
    let rendered = render_error(err, file_source.as_deref());
    match rendered.strip_prefix("error") {
        Some(rest) => format!("{}{rest}", logging::error_label()),
        None => rendered,
    }
}

fn print_host_state(host: &Arc<RecordingHost>, show_request: bool) {
    if show_request && let Some(request) = host.request() {
        println!("{}", logging::section_label("request"));
        println!("  {} {}", logging::method_label(&request.method), request.url);
        for (name, value) in &request.headers {
            println!("  {name}: {value}");
        }
        if !request.body.is_empty() {
            println!();
            println!("  {}", request.body);
        }
    }
    let writes = host.take_writes();
    if writes.is_empty() {
        return;
    }
    println!("{}", logging::section_label("writes"));
    for write in writes {
        println!("  {}", describe_write(&write));
    }
}

fn describe_write(write: &Write) -> String {
    match write {
        Write::Var { name, value } => format!("var {name} = {value}"),
        Write::Global {
            name,
            secret: true,
            ..
        } => format!("global {name} = *** (secret)"),
        Write::Global { name, value, .. } => format!("global {name} = {value}"),
        Write::DeleteGlobal(name) => format!("delete global {name}"),
    }
}

fn print_usage() {
    println!("Usage:");
    println!("  rts [options] <script.rts>");
    println!("  rts [options] -e <expr>");
    println!("  rts repl [options]");
    println!();
    println!("Options:");
    println!("  --use <path>[=alias]     import a module (repeatable)");
    println!("  --var <name=value>       request variable (repeatable)");
    println!("  --env <name=value>       environment value (repeatable)");
    println!("  --global <name=value>    global variable (repeatable)");
    println!("  --method <method>        method of the request being sent");
    println!("  --url <url>              url of the request being sent");
    println!("  --header <'Name: value'> request header (repeatable)");
    println!("  --body <text>            request body");
    println!("  --base-dir <dir>         directory for relative paths");
    println!("  --allow-random           enable uuid() and math.random()");
    println!("  --max-string <bytes>     cap on string size");
    println!("  --max-list <items>       cap on list length");
    println!("  --max-dict <items>       cap on dict size");
    println!("  --max-depth <calls>      cap on call depth");
    println!("  --max-nesting <levels>   cap on list and dict nesting");
    println!("  --config <file.json>     limits and allow_random from a file");
    println!("  -v, --verbose            debug logging (RTS_LOG overrides)");
}

fn run_repl(
    engine: &Engine,
    settings: &Settings,
    host: &Arc<RecordingHost>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("rts REPL");
    println!("history: up/down arrows, commands: .help, .request, .quit");
    println!("state: request edits and variable writes persist across entries");
    let mut editor = DefaultEditor::new()?;
    let mut entry = 0u32;
    loop {
        match editor.readline("rts> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                match line {
                    ".quit" | ".exit" => break,
                    ".help" => {
                        println!("enter a script line; each line is evaluated on its own");
                        println!("commands: .help, .request, .quit");
                        continue;
                    }
                    ".request" => {
                        print_host_state(host, true);
                        continue;
                    }
                    _ => {}
                }
                entry += 1;
                let label = format!("<repl:{entry}>");
                let mut ctx = settings.ctx();
                let runtime = host.bind(settings.runtime());
                match engine.eval(&mut ctx, &runtime, line, &Pos::new(label.as_str(), 1, 1)) {
                    Ok(value) => println!("=> {value}"),
                    Err(err) => println!("{}", render(&err, &label, line)),
                }
                print_host_state(host, false);
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("bye");
                break;
            }
            Err(err) => {
                return Err(Box::new(io::Error::other(err.to_string())));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn parses_request_and_variable_flags() {
        let cfg = parse_cli_args(&args(&[
            "--method",
            "post",
            "--url",
            "https://api.test/x",
            "--header",
            "Accept: application/json",
            "--var",
            "token=a=b",
            "--use",
            "./lib/auth.rts=login",
            "script.rts",
        ]))
        .expect("args should parse");
        assert_eq!(cfg.method.as_deref(), Some("POST"));
        assert_eq!(
            cfg.headers,
            vec![("Accept".to_string(), "application/json".to_string())]
        );
        assert_eq!(cfg.vars, vec![("token".to_string(), "a=b".to_string())]);
        assert_eq!(
            cfg.uses,
            vec![("./lib/auth.rts".to_string(), Some("login".to_string()))]
        );
        assert_eq!(cfg.source.as_deref(), Some("script.rts"));
    }

    #[test]
    fn rejects_bad_flags() {
        assert!(parse_cli_args(&args(&["--bogus"])).is_err());
        assert!(parse_cli_args(&args(&["--var", "novalue"])).is_err());
        assert!(parse_cli_args(&args(&["--max-depth", "deep"])).is_err());
        assert!(parse_cli_args(&args(&["--expr"])).is_err());
        assert!(parse_cli_args(&args(&["a.rts", "b.rts"])).is_err());
        assert!(parse_cli_args(&args(&["repl", "-e", "1"])).is_err());
    }

    #[test]
    fn use_paths_keep_non_identifier_suffixes() {
        assert_eq!(parse_use("./a=b/c.rts"), ("./a=b/c.rts".to_string(), None));
        assert_eq!(parse_use("./c.rts"), ("./c.rts".to_string(), None));
    }

    #[test]
    fn flags_override_the_config_file() {
        let cli = parse_cli_args(&args(&[
            "--max-list",
            "5",
            "--max-nesting",
            "16",
            "--base-dir",
            "/work",
        ]))
        .expect("args should parse");
        let file = config::FileConfig {
            limits: config::LimitsConfig {
                max_list: Some(1),
                max_dict: Some(2),
                ..config::LimitsConfig::default()
            },
            allow_random: Some(true),
        };
        let settings = Settings::new(&cli, &file).expect("settings");
        assert_eq!(settings.limits.max_list, 5);
        assert_eq!(settings.limits.max_dict, 2);
        assert_eq!(settings.limits.max_nesting, 16);
        assert!(settings.allow_random);
        assert_eq!(settings.base_dir, PathBuf::from("/work"));
    }

    #[test]
    fn secret_globals_are_masked() {
        let write = Write::Global {
            name: "token".to_string(),
            value: Value::from("s3cr3t"),
            secret: true,
        };
        assert_eq!(describe_write(&write), "global token = *** (secret)");
    }
}
