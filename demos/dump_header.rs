//! Prints the header and a per-tick summary of a demo file, one line
//! per event, to demonstrate the collaborator interface end to end.

use std::env;
use std::fs::File;
use std::io::BufReader;

use demoinfocs1_lite::event::DemoEvent;
use demoinfocs1_lite::{Parser, ParserConfig};

fn main() {
    env_logger::init();

    let path = match env::args().nth(1) {
        Some(path) => path,
        None => {
            eprintln!("usage: dump_header <demo.dem>");
            std::process::exit(1);
        }
    };

    let file = File::open(&path).expect("open demo file");
    let reader = BufReader::new(file);

    let mut parser = Parser::new(ParserConfig::default());
    let mut entity_updates = 0u64;

    parser
        .parse(reader, |event| {
            match event {
                DemoEvent::Header(header) => {
                    println!(
                        "map={} tickrate={} demo_type={:?}",
                        header.map_name,
                        header.tickrate(),
                        header.demo_type()
                    );
                }
                DemoEvent::GameEvent(evt) => println!("game_event: {evt:?}"),
                DemoEvent::EntityUpdate { .. } => entity_updates += 1,
                DemoEvent::End => println!("entity_updates={entity_updates}"),
                _ => {}
            }
            Ok(())
        })
        .expect("parse demo");
}
