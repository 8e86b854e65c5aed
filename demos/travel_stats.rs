//! Travel price statistics pipeline
//!
//! Two CSV feeds (flights and hotels) are extracted in batches, filtered by
//! destination with running price statistics, joined into offers and
//! aggregated into a final report.
//!
//! Usage: RUST_LOG=etl_pipeline=debug cargo run --example travel_stats

use etl_pipeline::{
    with_stats, Aggregate, LineBatches, PipelineBuilder, Result as PipelineResult,
};
use std::io;
use tracing_subscriber::EnvFilter;

const FLIGHTS: &str = "origin,destination,price\n\
    GRU,Lisbon,780\n\
    GIG,Lisbon,820\n\
    GRU,Madrid,690\n\
    BSB,Lisbon,910\n\
    GRU,Paris,1020\n\
    GIG,Lisbon,760\n";

const HOTELS: &str = "city,name,price\n\
    Lisbon,Alfama Inn,120\n\
    Madrid,Sol Rooms,95\n\
    Lisbon,Tejo Suites,210\n\
    Paris,Rive Gauche,180\n";

const DESTINATION: &str = "Lisbon";

fn read_batch(batch: io::Result<String>) -> PipelineResult<String> {
    Ok(batch?)
}

fn price(row: &str) -> Option<f64> {
    row.rsplit(',').next()?.trim().parse().ok()
}

/// Keep rows whose `column` equals the destination
fn rows_for(batch: &str, column: usize) -> String {
    batch
        .lines()
        .filter(|row| row.split(',').nth(column) == Some(DESTINATION))
        .map(|row| format!("{row}\n"))
        .collect()
}

/// Row count and price sum of the matching rows, for the running statistics
fn price_stats(batch: &str, column: usize) -> Vec<f64> {
    let rows = rows_for(batch, column);
    let prices: Vec<f64> = rows.lines().filter_map(price).collect();
    vec![prices.len() as f64, prices.iter().sum()]
}

/// Cheapest flight combined with the cheapest hotel seen so far
fn best_offer(args: &[String]) -> PipelineResult<String> {
    let cheapest = |rows: &str| {
        rows.lines()
            .filter_map(|row| price(row).map(|p| (p, row.to_string())))
            .min_by(|a, b| a.0.total_cmp(&b.0))
    };
    Ok(match (cheapest(&args[0]), cheapest(&args[1])) {
        (Some((flight, _)), Some((hotel, name))) => {
            format!("offer,{:.0},{}\n", flight + hotel, name)
        }
        _ => String::new(),
    })
}

/// Keeps only the best offer across the whole run
struct BestOffer;

impl Aggregate<String> for BestOffer {
    fn split(&self, accumulator: String) -> Vec<String> {
        let best = accumulator
            .lines()
            .filter_map(|row| {
                let total: f64 = row.split(',').nth(1)?.parse().ok()?;
                Some((total, row))
            })
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, row)| format!("{row}\n"))
            .unwrap_or_default();
        vec![best]
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut pipeline = PipelineBuilder::new()
        .workers(4)
        .thread_name("travel")
        .build::<String>()?;

    let flights = LineBatches::from_text(FLIGHTS, 2)?;
    let hotels = LineBatches::from_text(HOTELS, 2)?;
    println!("Flight columns: {:?}", flights.header());
    println!("Hotel columns:  {:?}", hotels.header());

    let flight_source = pipeline.add_extractor("flights", 4, flights, read_batch)?;
    let hotel_source = pipeline.add_extractor("hotels", 4, hotels, read_batch)?;
    let flight_rows = pipeline.claim_output(flight_source)?;
    let hotel_rows = pipeline.claim_output(hotel_source)?;

    let flight_filter = pipeline.add_transformer(
        "flight-filter",
        &[flight_rows],
        1,
        4,
        with_stats(
            |args: &[String]| Ok(rows_for(&args[0], 1)),
            |args: &[String]| price_stats(&args[0], 1),
        ),
    )?;
    let hotel_filter = pipeline.add_transformer(
        "hotel-filter",
        &[hotel_rows],
        2,
        4,
        with_stats(
            |args: &[String]| Ok(rows_for(&args[0], 0)),
            |args: &[String]| price_stats(&args[0], 0),
        ),
    )?;

    let lisbon_flights = pipeline.claim_output(flight_filter)?;
    let lisbon_hotels = pipeline.claim_output(hotel_filter)?;
    let hotel_listing = pipeline.claim_output(hotel_filter)?;

    let join = pipeline.add_transformer(
        "offers",
        &[lisbon_flights, lisbon_hotels],
        1,
        4,
        best_offer,
    )?;
    let offers = pipeline.claim_output(join)?;
    let best = pipeline.add_aggregator("best-offer", offers, 1, 1, BestOffer)?;
    let best = pipeline.claim_output(best)?;

    pipeline.add_loader("listing", hotel_listing, |rows: String| -> PipelineResult<()> {
        print!("hotel in {DESTINATION}: {rows}");
        Ok(())
    })?;
    pipeline.add_loader("report", best, |row: String| -> PipelineResult<()> {
        print!("best {row}");
        Ok(())
    })?;

    let report = pipeline.run()?.ensure_success()?;

    for (label, stage) in [("flights", flight_filter), ("hotels", hotel_filter)] {
        if let Some([count, sum]) = report.stats(stage) {
            let mean = if *count > 0.0 { sum / count } else { 0.0 };
            println!("{label} to {DESTINATION}: {count} rows, mean price {mean:.1}");
        }
    }
    println!("\n{}", report.summary());

    Ok(())
}
