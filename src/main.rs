use clap::Parser;
use homedir::my_home;

mod ai;
mod app;
mod cli;
mod config;
mod eid;
mod errors;
mod fetch;
mod items;
mod ocr;
mod pipeline;
mod search;
mod storage;
mod vector;

use config::Config;

fn base_path() -> String {
    std::env::var("STASH_BASE_PATH").unwrap_or_else(|_| {
        format!(
            "{}/.local/share/stash",
            my_home()
                .expect("couldnt find home dir")
                .expect("couldnt find home dir")
                .to_string_lossy()
        )
    })
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = cli::Args::parse();

    let config = Config::load_with(&base_path());
    let mut app = app::App::new(config)?;

    match args.command {
        cli::Command::AddText { text, title } => {
            app.run_queue();
            let item = app.capture_text(title, text)?;
            app.drain();
            app.shutdown();

            let record = app.show(item.id)?;
            println!("{}", serde_json::to_string_pretty(&record).unwrap());
            Ok(())
        }

        cli::Command::AddLink { url } => {
            app.run_queue();
            let item = app.capture_link(url)?;
            app.drain();
            app.shutdown();

            let record = app.show(item.id)?;
            println!("{}", serde_json::to_string_pretty(&record).unwrap());
            Ok(())
        }

        cli::Command::AddFile { path } => {
            app.run_queue();
            let item = app.capture_file(&path)?;
            app.drain();
            app.shutdown();

            let record = app.show(item.id)?;
            println!("{}", serde_json::to_string_pretty(&record).unwrap());
            Ok(())
        }

        cli::Command::Search {
            query,
            limit,
            min_score,
        } => {
            let results = app.search(&query, limit, min_score)?;

            if results.is_empty() {
                println!("no results");
                return Ok(());
            }

            println!("{}", serde_json::to_string_pretty(&results).unwrap());
            Ok(())
        }

        cli::Command::Show { id } => {
            match app.show(id)? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record).unwrap()),
                None => println!("item {id} not found"),
            }
            Ok(())
        }

        cli::Command::Status {} => {
            let records = app.list()?;
            for record in records {
                println!(
                    "#{}\t{:?}\t{}\t{}",
                    record.item.id,
                    record.item.status,
                    record.item.kind,
                    record.item.title
                );
            }
            Ok(())
        }

        cli::Command::Retry { id } => {
            app.run_queue();
            let item = app.retry(id)?;
            app.drain();
            app.shutdown();

            println!("item {} reprocessed", item.id);
            let record = app.show(id)?;
            println!("{}", serde_json::to_string_pretty(&record).unwrap());
            Ok(())
        }

        cli::Command::Delete { id } => {
            app.delete(id)?;
            println!("item {id} removed");
            Ok(())
        }

        cli::Command::Process {} => {
            app.run_queue();
            app.drain();
            app.shutdown();
            println!("queue drained");
            Ok(())
        }
    }
}
