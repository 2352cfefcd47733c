use std::{fs, io};

use anyhow::Context;
use clap::{crate_version, App, Arg, ArgMatches};
use log::{info, LevelFilter};

use kaleido::{
    ir::Module,
    lexer::{CharSource, Lexer, ReaderSource},
    ItemKind, Session,
};

struct Options {
    print_ast: bool,
    eval: bool,
    emit_ir: bool,
}

fn app() -> App<'static, 'static> {
    let app = App::new("kaleido")
        .version(crate_version!())
        .about("compile a kaleido program to IR")
        .arg(
            Arg::with_name("input")
                .help("source file, standard input when omitted")
                .index(1),
        )
        .arg(
            Arg::with_name("tokens")
                .long("tokens")
                .help("print the token stream and exit"),
        )
        .arg(
            Arg::with_name("print-ast")
                .long("print-ast")
                .help("print each top-level construct as it is parsed"),
        )
        .arg(
            Arg::with_name("eval")
                .long("eval")
                .help("evaluate top-level expressions and print their values"),
        )
        .arg(
            Arg::with_name("no-ir")
                .long("no-ir")
                .help("do not print the module once compilation finishes"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .multiple(true)
                .help("raise the log level, may be repeated"),
        );

    if cfg!(feature = "llvm") {
        app.arg(
            Arg::with_name("llvm")
                .long("llvm")
                .conflicts_with("eval")
                .help("lower through LLVM instead of the built-in IR"),
        )
    } else {
        app
    }
}

fn init_logging(verbosity: u64) {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn dump_tokens<S: CharSource>(source: S) -> anyhow::Result<()> {
    for token in Lexer::new(source) {
        println!("{}", token?);
    }
    Ok(())
}

fn compile<S: CharSource>(source: S, options: &Options) -> anyhow::Result<()> {
    let mut session = Session::new(Module::new("kaleido"));

    let result = session.compile_with(source, |node, item, module: &mut Module| {
        if options.print_ast {
            println!("{}", node);
        }
        if options.eval && item.kind == ItemKind::TopLevelExpr {
            let value = module
                .evaluate(&item.name, &[])
                .with_context(|| format!("failed to evaluate {}", node))?;
            println!("{}", value);
        }
        Ok::<_, anyhow::Error>(())
    });

    if options.emit_ir {
        print!("{}", session.backend());
    }
    result
}

#[cfg(feature = "llvm")]
fn compile_llvm<S: CharSource>(source: S, options: &Options) -> anyhow::Result<()> {
    use inkwell::context::Context;
    use kaleido::{llvm::LlvmBackend, CompileError};

    let context = Context::create();
    let mut session = Session::new(LlvmBackend::new(&context, "kaleido"));
    let result = session.compile_with(source, |node, _, _: &mut LlvmBackend| {
        if options.print_ast {
            println!("{}", node);
        }
        Ok::<_, CompileError>(())
    });

    if options.emit_ir {
        print!("{}", session.backend());
    }
    Ok(result?)
}

fn run<S: CharSource>(source: S, matches: &ArgMatches) -> anyhow::Result<()> {
    if matches.is_present("tokens") {
        return dump_tokens(source);
    }

    let options = Options {
        print_ast: matches.is_present("print-ast"),
        eval: matches.is_present("eval"),
        emit_ir: !matches.is_present("no-ir"),
    };

    #[cfg(feature = "llvm")]
    {
        if matches.is_present("llvm") {
            return compile_llvm(source, &options);
        }
    }

    compile(source, &options)
}

fn main() -> anyhow::Result<()> {
    let matches = app().get_matches();
    init_logging(matches.occurrences_of("verbose"));

    match matches.value_of("input") {
        Some(path) => {
            info!("compiling {}", path);
            let source =
                fs::read_to_string(path).with_context(|| format!("failed to read {}", path))?;
            run(source.chars(), &matches)
        }
        None => {
            info!("compiling standard input");
            let stdin = io::stdin();
            let source = ReaderSource::new(stdin.lock());
            run(source, &matches)
        }
    }
}
