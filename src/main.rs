mod btree;
mod buffer;
mod catalog;
mod commands;
mod constants;
mod fixed_str;
mod join;
mod loader;
mod lru;
mod materialize;
mod operator;
mod page;
mod row;
mod scan;
mod tree_node;

use anyhow::{bail, Result};
use env_logger::Env;
use std::io::{BufRead, Write};

fn print_usage() {
    eprintln!(
        "Commands:\n  \
         pre_process [test]\n  \
         run_query <start_range> <end_range> <buffer_size> [test]\n  \
         quit"
    );
}

fn run_command(tokens: &[String]) -> Result<()> {
    match tokens[0].as_str() {
        "pre_process" => {
            if tokens.len() > 2 {
                bail!("usage: pre_process [test]");
            }
            let test = tokens.get(1).map(String::as_str) == Some("test");
            commands::pre_process(test)
        }
        "run_query" => {
            if tokens.len() != 4 && tokens.len() != 5 {
                bail!("usage: run_query <start> <end> <buffer_size> [test]");
            }
            let buffer_size: usize = match tokens[3].parse() {
                Ok(n) if n > 0 => n,
                _ => bail!("buffer_size '{}' is not a positive integer", tokens[3]),
            };
            let test = tokens.get(4).map(String::as_str) == Some("test");
            commands::run_query(&tokens[1], &tokens[2], buffer_size, test)?;
            Ok(())
        }
        other => {
            print_usage();
            bail!("unknown command: {}", other);
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        // one-shot mode: run the single command, exit nonzero on failure
        if args[0] == "quit" || args[0] == "exit" {
            bail!("'{}' is only valid in interactive mode", args[0]);
        }
        return run_command(&args);
    }

    // interactive mode: prompt until quit; errors keep the loop alive
    print_usage();
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let tokens: Vec<String> = line.split_whitespace().map(String::from).collect();
        if tokens.is_empty() {
            continue;
        }
        if tokens[0] == "quit" || tokens[0] == "exit" {
            break;
        }
        if let Err(e) = run_command(&tokens) {
            eprintln!("Error: {:#}", e);
        }
    }
    Ok(())
}
