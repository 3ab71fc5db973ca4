use std::io;

use blt_engine::{
    BackendKind, BitBuffer, CallOptions, CompilerFlags, Engine, EngineConfig, GeneratedCode,
    create_backend,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliConfig {
    backend: Option<String>,
    config_path: Option<String>,
    scenario: Option<String>,
    verify: bool,
    no_specialize: bool,
    log_perf: bool,
    unroll: bool,
    inline_constants: bool,
    align_opt: bool,
    debug: bool,
    dump_source: bool,
    help: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            backend: None,
            config_path: None,
            scenario: None,
            verify: false,
            no_specialize: false,
            log_perf: false,
            unroll: false,
            inline_constants: false,
            align_opt: false,
            debug: false,
            dump_source: false,
            help: false,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging()?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli_args(&args).map_err(io::Error::other)?;
    if cli.help {
        print_usage();
        return Ok(());
    }

    let config = resolve_config(&cli)?;
    if cli.dump_source {
        dump_generated_source(&config)?;
        return Ok(());
    }

    let mut engine = Engine::new(config);
    let scenarios: Vec<&str> = match cli.scenario.as_deref() {
        Some(name) => vec![name],
        None => vec!["full", "partial", "offset", "aligned", "shifted"],
    };
    for name in scenarios {
        run_scenario(&mut engine, name)?;
    }
    Ok(())
}

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err| io::Error::other(err.to_string()))?;
    Ok(())
}

fn resolve_config(cli: &CliConfig) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config_path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str::<EngineConfig>(&text)?
        }
        None => EngineConfig::default(),
    };

    if let Some(name) = &cli.backend {
        config.backend = BackendKind::from_name(name)?;
    }
    config.verify |= cli.verify;
    config.log_perf |= cli.log_perf;
    if cli.no_specialize {
        config.use_specialized = false;
    }
    config.compiler = CompilerFlags {
        unroll: config.compiler.unroll || cli.unroll,
        inline_constants: config.compiler.inline_constants || cli.inline_constants,
        align_opt: config.compiler.align_opt || cli.align_opt,
        debug: config.compiler.debug || cli.debug,
    };
    Ok(config)
}

fn dump_generated_source(config: &EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let backend = create_backend(config.backend.name())?;
    let op = blt_engine::BlitOp {
        src_w: 8,
        src_h: 8,
        dst_w: 8,
        width: 8,
        height: 8,
        ..blt_engine::BlitOp::default()
    };
    let params = blt_engine::CompileParams {
        shape: blt_engine::BlitShape::frozen(&op),
        flags: config.compiler,
    };
    match backend.generate(&params)? {
        GeneratedCode::Text(source) => println!("{source}"),
        GeneratedCode::Module(bytes) => {
            for chunk in bytes.chunks(16) {
                let line: Vec<String> = chunk.iter().map(|byte| format!("{byte:02x}")).collect();
                println!("{}", line.join(" "));
            }
        }
    }
    Ok(())
}

fn run_scenario(engine: &mut Engine, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let options = Some(CallOptions::default());
    match name {
        "full" => {
            let src = BitBuffer::checkerboard(8, 8, 0);
            let mut dst = BitBuffer::new(8, 8);
            engine.bitblt(&src.words, 8, 8, 0, 0, &mut dst.words, 8, 0, 0, 8, 8, options)?;
            report(name, dst.words == src.words);
        }
        "partial" => {
            let src = BitBuffer::checkerboard(8, 8, 0);
            let mut dst = BitBuffer::new(8, 8);
            engine.bitblt(&src.words, 8, 8, 2, 2, &mut dst.words, 8, 0, 0, 4, 4, options)?;
            let ok = (0..4).all(|y| {
                (0..4).all(|x| dst.get(x, y) == u32::from(((x + 2) ^ (y + 2)) & 1 == 0))
            });
            report(name, ok);
        }
        "offset" => {
            let src = BitBuffer::checkerboard(4, 4, 1);
            let mut dst = BitBuffer::new(8, 8);
            engine.bitblt(&src.words, 4, 4, 0, 0, &mut dst.words, 8, 2, 2, 4, 4, options)?;
            let ok = (0..8).all(|y| {
                (0..8).all(|x| {
                    let inside = (2..6).contains(&x) && (2..6).contains(&y);
                    let expected = if inside {
                        u32::from(((x - 2) ^ (y - 2)) & 1 == 1)
                    } else {
                        0
                    };
                    dst.get(x, y) == expected
                })
            });
            report(name, ok);
        }
        "aligned" => {
            let mut src = BitBuffer::new(1024, 1024);
            for (index, word) in src.words.iter_mut().enumerate() {
                if index % 32 == 0 {
                    *word = 0xAAAA_AAAA;
                }
            }
            let mut dst = BitBuffer::new(1024, 1024);
            engine.bitblt(
                &src.words, 1024, 1024, 0, 0, &mut dst.words, 1024, 0, 0, 1024, 1024, options,
            )?;
            report(name, dst.words == src.words);
        }
        "shifted" => {
            let src = BitBuffer::checkerboard(32, 32, 0);
            let mut dst = BitBuffer::new(64, 32);
            engine.bitblt(
                &src.words, 32, 32, 3, 0, &mut dst.words, 64, 5, 0, 27, 32, options,
            )?;
            let ok = (0..27).all(|x| (0..32).all(|y| dst.get(x + 5, y) == src.get(x + 3, y)));
            report(name, ok);
        }
        other => {
            return Err(io::Error::other(format!("unknown scenario '{other}'")).into());
        }
    }
    Ok(())
}

fn report(name: &str, ok: bool) {
    if ok {
        info!(scenario = name, "ok");
    } else {
        info!(scenario = name, "MISMATCH");
    }
}

fn parse_cli_args(args: &[String]) -> Result<CliConfig, String> {
    let mut cfg = CliConfig::default();
    let mut index = 0usize;

    while index < args.len() {
        match args[index].as_str() {
            "-h" | "--help" => {
                cfg.help = true;
                index += 1;
            }
            "--backend" => {
                let name = args
                    .get(index + 1)
                    .ok_or_else(|| "missing value for --backend".to_string())?
                    .clone();
                cfg.backend = Some(name);
                index += 2;
            }
            "--config" => {
                let path = args
                    .get(index + 1)
                    .ok_or_else(|| "missing value for --config".to_string())?
                    .clone();
                cfg.config_path = Some(path);
                index += 2;
            }
            "--verify" => {
                cfg.verify = true;
                index += 1;
            }
            "--no-specialize" => {
                cfg.no_specialize = true;
                index += 1;
            }
            "--log-perf" => {
                cfg.log_perf = true;
                index += 1;
            }
            "--unroll" => {
                cfg.unroll = true;
                index += 1;
            }
            "--inline-constants" => {
                cfg.inline_constants = true;
                index += 1;
            }
            "--align-opt" => {
                cfg.align_opt = true;
                index += 1;
            }
            "--debug" => {
                cfg.debug = true;
                index += 1;
            }
            "--dump-source" => {
                cfg.dump_source = true;
                index += 1;
            }
            value if value.starts_with('-') => {
                return Err(format!("unknown flag '{value}'"));
            }
            name => {
                if cfg.scenario.is_some() {
                    return Err("multiple scenarios provided".to_string());
                }
                cfg.scenario = Some(name.to_string());
                index += 1;
            }
        }
    }

    Ok(cfg)
}

fn print_usage() {
    println!("Usage:");
    println!("  blt [--backend textual|binary|aligned-binary] [scenario]");
    println!("  blt --verify [--log-perf] [scenario]");
    println!("  blt --unroll --inline-constants [--align-opt] [--debug] [scenario]");
    println!("  blt --config <file.json> [scenario]");
    println!("  blt --dump-source [--backend NAME]");
    println!();
    println!("Scenarios: full, partial, offset, aligned, shifted (default: all)");
}

#[cfg(test)]
mod tests {
    use super::parse_cli_args;

    fn s(value: &str) -> String {
        value.to_string()
    }

    #[test]
    fn parse_cli_defaults() {
        let cfg = parse_cli_args(&[]).expect("parse should succeed");
        assert!(!cfg.verify);
        assert!(!cfg.no_specialize);
        assert!(cfg.backend.is_none());
        assert!(cfg.scenario.is_none());
    }

    #[test]
    fn parse_cli_backend_and_scenario() {
        let cfg = parse_cli_args(&[s("--backend"), s("binary"), s("full"), s("--verify")])
            .expect("parse should succeed");
        assert_eq!(cfg.backend.as_deref(), Some("binary"));
        assert_eq!(cfg.scenario.as_deref(), Some("full"));
        assert!(cfg.verify);
    }

    #[test]
    fn parse_cli_rejects_unknown_flags_and_extra_scenarios() {
        let err = parse_cli_args(&[s("--bogus")]).expect_err("parse should fail");
        assert!(err.contains("unknown flag"));
        let err = parse_cli_args(&[s("full"), s("partial")]).expect_err("parse should fail");
        assert!(err.contains("multiple scenarios"));
    }

    #[test]
    fn parse_cli_compiler_flags() {
        let cfg = parse_cli_args(&[
            s("--unroll"),
            s("--inline-constants"),
            s("--align-opt"),
            s("--debug"),
        ])
        .expect("parse should succeed");
        assert!(cfg.unroll && cfg.inline_constants && cfg.align_opt && cfg.debug);
    }
}
