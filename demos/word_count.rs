//! Word frequency counter pipeline
//!
//! Reads lines from stdin, cleans them into words, counts frequencies and
//! prints the top words once the input is exhausted.
//!
//! Usage: cargo run --example word_count --release
//!        (Then type lines of text and press Ctrl-D to finish)

use etl_pipeline::{Aggregate, Pipeline, Result as PipelineResult};
use std::collections::HashMap;
use std::io::{self, Read};

/// Lowercase a line into space-separated words
fn split_words(line: String) -> PipelineResult<String> {
    Ok(line
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" "))
}

/// Keep alphanumeric words longer than two characters
fn clean_words(args: &[String]) -> PipelineResult<String> {
    Ok(args[0]
        .split(' ')
        .map(|word| word.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        .filter(|word| word.len() > 2)
        .collect::<Vec<_>>()
        .join(" "))
}

/// Counts every word and emits the top entries as one report
struct TopWords {
    limit: usize,
}

impl Aggregate<String> for TopWords {
    fn partial(&self, item: String) -> PipelineResult<String> {
        Ok(format!("{item} "))
    }

    fn split(&self, accumulator: String) -> Vec<String> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for word in accumulator.split_whitespace() {
            *counts.entry(word).or_insert(0) += 1;
        }
        let mut items: Vec<_> = counts.into_iter().collect();
        items.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

        let report = items
            .into_iter()
            .take(self.limit)
            .enumerate()
            .map(|(i, (word, count))| format!("{:2}. {} ({})\n", i + 1, word, count))
            .collect();
        vec![report]
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Word Frequency Counter Pipeline");
    println!("================================");
    println!("Enter lines of text (Ctrl-D to finish):");
    println!();

    let mut text = String::new();
    io::stdin().read_to_string(&mut text)?;
    let lines: Vec<String> = text.lines().map(str::to_string).collect();

    let mut pipeline = Pipeline::<String>::builder().workers(4).build()?;
    let reader = pipeline.add_extractor("reader", 100, lines, split_words)?;
    let raw = pipeline.claim_output(reader)?;
    let cleaner = pipeline.add_transformer("cleaner", &[raw], 1, 200, clean_words)?;
    let words = pipeline.claim_output(cleaner)?;
    let counter = pipeline.add_aggregator("counter", words, 1, 1, TopWords { limit: 10 })?;
    let top = pipeline.claim_output(counter)?;
    pipeline.add_loader("printer", top, |report: String| -> PipelineResult<()> {
        println!("\n=== Top 10 Words ===");
        print!("{report}");
        Ok(())
    })?;

    let report = pipeline.run()?.ensure_success()?;

    println!("\n{}", report.summary());
    println!("Processing complete!");

    Ok(())
}
