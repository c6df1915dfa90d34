//! Survey, selection and re-simulation over whole batches.

use dnd_sim::orchestrator::selection::{nearest_rank, ranked, TIER_A_PERCENTILES};
use dnd_sim::persist::save_result_json;
use dnd_sim::testing::{sample_day, sample_party};
use dnd_sim::{
    run_batch_async, simulate, CancellationToken, Phase, ScenarioDocument, SimConfig, SimError,
    SimulationRequest,
};
use tokio::sync::mpsc;

fn request(iterations: u32, seed: u64) -> SimulationRequest {
    SimulationRequest::new(sample_party(), sample_day())
        .with_iterations(iterations)
        .with_seed(seed)
}

#[test]
fn test_percentile_picks_follow_nearest_rank() {
    let result = simulate(request(101, 3), SimConfig::default()).unwrap();
    let ordered = ranked(&result.runs);
    assert_eq!(ordered.len(), 101);
    assert_eq!(result.selection.tier_a.len(), TIER_A_PERCENTILES.len());
    for pick in &result.selection.tier_a {
        let expected = ordered[nearest_rank(ordered.len(), pick.percentile)];
        assert_eq!(pick.run_index, expected.run_index);
        assert_eq!(pick.score, expected.score);
    }
    for pair in ordered.windows(2) {
        assert!(pair[0].score <= pair[1].score);
    }
}

#[test]
fn test_detailed_runs_reproduce_their_survey() {
    for seed in [1, 2] {
        let result = simulate(request(80, seed), SimConfig::default()).unwrap();
        assert_eq!(result.detailed.len(), TIER_A_PERCENTILES.len());
        for detailed in &result.detailed {
            let surveyed = &result.runs[detailed.record.run_index as usize];
            assert_eq!(surveyed.seed, detailed.record.seed);
            assert_eq!(surveyed.score, detailed.record.score);
            assert_eq!(surveyed.deaths, detailed.record.deaths);
        }
    }
}

#[test]
fn test_tier_c_extremes_are_ordered() {
    let result = simulate(request(50, 9), SimConfig::default()).unwrap();
    let encounters = sample_day().iter().filter(|s| s.encounter().is_some()).count();
    assert_eq!(result.selection.tier_c.len(), encounters);
    for extremes in &result.selection.tier_c {
        assert!(extremes.min.score <= extremes.median.score);
        assert!(extremes.median.score <= extremes.max.score);
    }
}

#[tokio::test]
async fn test_async_batch_reports_progress() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let config = SimConfig::default().with_chunk_size(10);
    let result = run_batch_async(request(40, 5), config, CancellationToken::new(), Some(tx))
        .await
        .unwrap();
    assert_eq!(result.runs.len(), 40);

    let mut updates = Vec::new();
    while let Ok(progress) = rx.try_recv() {
        updates.push(progress);
    }
    assert!(updates.len() >= 4);
    for pair in updates.windows(2) {
        assert!(pair[0].fraction <= pair[1].fraction);
    }
    let last = updates.last().unwrap();
    assert_eq!(last.phase, Phase::Done);
    assert_eq!(last.fraction, 1.0);
    assert_eq!(last.surveyed, 40);
}

#[tokio::test]
async fn test_async_batch_can_be_cancelled() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if rx.recv().await.is_some() {
            watcher.cancel();
        }
    });
    let config = SimConfig::default().with_chunk_size(5);
    let result = run_batch_async(request(500, 5), config, cancel, Some(tx)).await;
    assert!(matches!(result, Err(SimError::Cancelled)));
}

#[tokio::test]
async fn test_lightweight_batch_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let document = ScenarioDocument::from_request("Goblin Day", &request(30, 8));
    let path = dir.path().join("goblin-day.json");
    document.save_json(&path).await.unwrap();

    let loaded = ScenarioDocument::load_json(&path).await.unwrap();
    let config = SimConfig::default().with_lightweight_threshold(10);
    let result = simulate(loaded.to_request().unwrap(), config).unwrap();
    assert!(result.lightweight);
    assert_eq!(result.detailed.len(), 1);
    assert_eq!(result.base_seed, 8);

    let out = dir.path().join("result.json");
    save_result_json(&result, &out).await.unwrap();
    let saved: serde_json::Value =
        serde_json::from_str(&tokio::fs::read_to_string(&out).await.unwrap()).unwrap();
    assert_eq!(saved["base_seed"].as_u64(), Some(8));
    assert_eq!(saved["runs"].as_array().unwrap().len(), 30);
}
