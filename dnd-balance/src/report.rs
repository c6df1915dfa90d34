//! Plain-text report printing.

use dnd_sim::day::RunRecord;
use dnd_sim::orchestrator::Phase;
use dnd_sim::{AutoAdjustResult, Progress, SimulationResult};

pub fn print_progress(progress: &Progress) {
    let phase = match progress.phase {
        Phase::Survey => "survey",
        Phase::Selection => "selection",
        Phase::Resimulation => "re-simulation",
        Phase::Done => "done",
    };
    eprintln!(
        "[{:>5.1}%] {:<13} {}/{} runs  win {:>5.1}%  score {:>5.1}",
        progress.fraction * 100.0,
        phase,
        progress.surveyed,
        progress.iterations,
        progress.win_rate * 100.0,
        progress.mean_score,
    );
}

pub fn print_report(name: &str, result: &SimulationResult) {
    let analysis = &result.analysis;
    println!("=== {} ===", if name.is_empty() { "Adventuring day" } else { name });
    println!(
        "{} runs (seed {}){}",
        result.iterations,
        result.base_seed,
        if result.lightweight { ", survey only" } else { "" }
    );
    if analysis.runs_failed > 0 {
        println!("{} runs failed", analysis.runs_failed);
    }
    println!("Win rate:   {:.1}%", analysis.win_rate * 100.0);
    println!("Mean score: {:.1}", analysis.mean_score);
    println!();

    println!("Deciles:");
    println!("  {:>3}  {:>6}  {:>6}  {:>6}", "#", "score", "deaths", "rounds");
    for decile in &analysis.deciles {
        println!(
            "  {:>3}  {:>6.1}  {:>6.2}  {:>6.1}",
            decile.decile, decile.mean_score, decile.mean_deaths, decile.mean_rounds
        );
    }
    println!();

    println!("Encounters:");
    for encounter in &analysis.encounters {
        println!(
            "  {:<20} {:<11} in context {:<11} win {:>5.1}%  deaths {}/{}/{}  drain {:>4.0}%  entering {:>4.0}%",
            encounter.name,
            encounter.isolated.to_string(),
            encounter.contextual.to_string(),
            encounter.win_rate * 100.0,
            encounter.deaths.best,
            encounter.deaths.median,
            encounter.deaths.worst,
            encounter.drain * 100.0,
            encounter.resources_entering * 100.0,
        );
    }

    if let Some(run) = result.representative() {
        println!();
        println!(
            "Representative run: P{:.0}, run {} (seed {}), score {:.1}, {} deaths",
            run.percentile, run.record.run_index, run.record.seed, run.record.score, run.record.deaths
        );
        for encounter in &run.encounters {
            println!(
                "  {}: {} rounds, {} events",
                encounter.name,
                encounter.summaries.len(),
                encounter.events.len()
            );
        }
    }

    if !result.diagnostics.is_empty() {
        println!();
        println!("Diagnostics:");
        for diagnostic in &result.diagnostics {
            println!("  {}", diagnostic);
        }
    }
}

pub fn print_adjustment(result: &AutoAdjustResult) {
    println!(
        "Tier {} -> {} (target {}, {})",
        result.initial,
        result.tier,
        result.target,
        if result.reached { "reached" } else { "not reached" }
    );
    if result.step == 0 {
        println!("No change proposed.");
        return;
    }
    println!("Proposed changes:");
    for delta in &result.deltas {
        println!(
            "  {:<20} HP {:+}  AC {:+}  saves {:+}",
            delta.monster, delta.hit_points, delta.armor_class, delta.save_bonus
        );
    }
}

pub fn print_run(record: &RunRecord) {
    println!("=== Run {} (seed {}) ===", record.run_index, record.seed);
    println!(
        "{:?} after {} rounds, {} deaths, score {:.1}",
        record.outcome, record.rounds, record.deaths, record.score
    );
    for encounter in &record.encounters {
        println!(
            "  {:<20} {:<10} rounds {:>2}  deaths {}  score {:>5.1}",
            encounter.name,
            format!("{:?}", encounter.outcome),
            encounter.rounds,
            encounter.deaths,
            encounter.score,
        );
    }
}
