use regex_redos::{analyze, Analysis, Dfa, DotOptions, EpsilonNfa, Flags, PrunedNfa};

use std::process;

fn print_usage() {
    eprintln!(
        "\
Usage: redoscan [OPTIONS] <COMMAND>

Commands:
  check <pattern>...   Analyze one or more patterns for catastrophic backtracking
  dot   <pattern>      Output DOT (Graphviz) representation of a pipeline stage

Options:
  --flags <LETTERS>    Pattern flags, JavaScript style (i and s are honored)
  --stage <STAGE>      Stage to render: enfa, nfa, reversed, dfa, pruned (default: pruned)
  --horizontal         Lay the DOT graph out left to right
  -h, --help           Print this help message"
    );
}

#[derive(Clone, Copy)]
enum Stage {
    Enfa,
    Nfa,
    Reversed,
    Dfa,
    Pruned,
}

enum Command {
    Check {
        patterns: Vec<String>,
        flags: Flags,
    },
    Dot {
        pattern: String,
        flags: Flags,
        stage: Stage,
        horizontal: bool,
    },
}

fn parse_args() -> Command {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        print_usage();
        process::exit(1);
    }

    let mut flags = Flags::default();
    let mut stage = Stage::Pruned;
    let mut horizontal = false;
    let mut positional = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                process::exit(0);
            }
            "--flags" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --flags requires a value");
                    process::exit(1);
                }
                flags = Flags::from_js(&args[i]).unwrap_or_else(|e| {
                    eprintln!("error: {e}");
                    process::exit(1);
                });
            }
            "--stage" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --stage requires a value");
                    process::exit(1);
                }
                stage = match args[i].as_str() {
                    "enfa" => Stage::Enfa,
                    "nfa" => Stage::Nfa,
                    "reversed" => Stage::Reversed,
                    "dfa" => Stage::Dfa,
                    "pruned" => Stage::Pruned,
                    other => {
                        eprintln!("error: unknown stage: {other}");
                        process::exit(1);
                    }
                };
            }
            "--horizontal" => {
                horizontal = true;
            }
            other if other.starts_with('-') => {
                eprintln!("error: unknown option: {other}");
                print_usage();
                process::exit(1);
            }
            _ => {
                positional.push(args[i].clone());
            }
        }
        i += 1;
    }

    if positional.is_empty() {
        print_usage();
        process::exit(1);
    }

    match positional[0].as_str() {
        "check" => {
            if positional.len() < 2 {
                eprintln!("error: 'check' command requires at least one pattern");
                process::exit(1);
            }
            Command::Check {
                patterns: positional[1..].to_vec(),
                flags,
            }
        }
        "dot" => {
            if positional.len() != 2 {
                eprintln!("error: 'dot' command takes exactly one pattern argument");
                process::exit(1);
            }
            Command::Dot {
                pattern: positional[1].clone(),
                flags,
                stage,
                horizontal,
            }
        }
        other => {
            eprintln!("error: unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    }
}

fn run_check(patterns: &[String], flags: Flags) {
    let mut any_failed = false;
    for pattern in patterns {
        match analyze(pattern, flags) {
            Ok(Analysis::Safe) => {
                println!("  \x1b[32mSAFE\x1b[0m  {:?}", pattern);
            }
            Ok(Analysis::Vulnerable(finding)) => {
                println!("  \x1b[31mVULNERABLE\x1b[0m  {:?}", pattern);
                println!("    {}", finding.message);
                match &finding.attack {
                    Some(attack) => println!("    attack: {:?}", attack),
                    None => println!("    attack: none (every input matches)"),
                }
                any_failed = true;
            }
            Err(e) => {
                eprintln!("error: {:?}: {e}", pattern);
                any_failed = true;
            }
        }
    }

    if any_failed {
        process::exit(1);
    }
}

fn run_dot(pattern: &str, flags: Flags, stage: Stage, horizontal: bool) {
    let enfa = EpsilonNfa::parse(pattern, flags).unwrap_or_else(|e| {
        eprintln!("error: failed to analyze pattern: {e}");
        process::exit(1);
    });
    let options = DotOptions { horizontal };
    let dot = match stage {
        Stage::Enfa => enfa.to_dot(options),
        Stage::Nfa => enfa.eliminate().to_dot(options),
        Stage::Reversed => enfa.eliminate().reverse().to_dot(options),
        Stage::Dfa => Dfa::determinize(&enfa.eliminate().reverse()).to_dot(options),
        Stage::Pruned => {
            let nfa = enfa.eliminate();
            let dfa = Dfa::determinize(&nfa.reverse());
            PrunedNfa::build(&nfa, &dfa).to_dot(options)
        }
    };
    print!("{dot}");
}

fn main() {
    match parse_args() {
        Command::Check { patterns, flags } => run_check(&patterns, flags),
        Command::Dot {
            pattern,
            flags,
            stage,
            horizontal,
        } => run_dot(&pattern, flags, stage, horizontal),
    }
}
