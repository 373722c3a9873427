//! Word frequency counter pipeline
//!
//! Reads lines from stdin, splits into words, counts frequencies, and prints the
//! top-N words every 100 words.
//!
//! Usage: cargo run --example word_count --release
//!        (Then type lines of text and press Ctrl-D to finish)

use std::collections::HashMap;
use stream_flow::prelude::*;
use stream_flow::{async_trait, InitialReady, Logic, Next};
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Counts words and periodically pushes the current top-N downstream
struct WordCounter {
    counts: HashMap<String, usize>,
    seen: usize,
    batch_size: usize,
    next: Next<(usize, Vec<(String, usize)>)>,
}

impl WordCounter {
    fn new(next: Next<(usize, Vec<(String, usize)>)>) -> Self {
        Self {
            counts: HashMap::new(),
            seen: 0,
            batch_size: 100,
            next,
        }
    }

    fn top_n(&self, n: usize) -> Vec<(String, usize)> {
        let mut items: Vec<_> = self.counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
        items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        items.into_iter().take(n).collect()
    }
}

#[async_trait]
impl Logic<String> for WordCounter {
    async fn on_push(&mut self, word: String) -> Result<()> {
        *self.counts.entry(word).or_insert(0) += 1;
        self.seen += 1;

        if self.seen % self.batch_size == 0 {
            let top = self.top_n(10);
            self.next.push((self.seen, top)).await?;
        }
        Ok(())
    }

    fn initial_ready(&self) -> InitialReady {
        self.next.initial_ready()
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("Word Frequency Counter Pipeline");
    println!("================================");
    println!("Enter lines of text (Ctrl-D to finish):");
    println!();

    let running = pushable::<String>()
        .flat_map(|line| {
            Ok(line
                .split_whitespace()
                .map(str::to_lowercase)
                .collect::<Vec<_>>())
        })
        .map(|word| Ok(word.chars().filter(|c| c.is_alphanumeric()).collect::<String>()))
        .filter(|word| word.len() > 2)
        .via(WordCounter::new)
        .run(|(seen, top): (usize, Vec<(String, usize)>)| async move {
            println!("\n=== Top 10 Words (after {seen} words) ===");
            for (i, (word, count)) in top.iter().enumerate() {
                println!("{:2}. {} ({})", i + 1, word, count);
            }
            Ok(())
        })?;

    let input = running.input();
    input.initial_ready().await?;

    let mut lines = BufReader::new(io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        input.push(line).await?;
    }

    running.cancel().await;
    println!("\n\nProcessing complete!");
    println!("{}", running.metrics().snapshot().format());

    Ok(())
}
