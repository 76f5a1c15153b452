//! Run Invariant Tests
//!
//! These tests verify the guarantees a full run must keep.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;

use editionforge_core::{
    build_collection, CatalogSource, DnaCodec, EditionScheduler, EngineConfig, EngineError,
    EngineResult, LayerCatalog, LayerConfigurationSpec, LayerOptions, LayerSpec, MetadataRecord,
    MetadataStore, Network, PerformanceTier, RenderDispatch, RenderJob, Renderer, RunState,
    Selection,
};

fn write_layer(root: &Path, layer: &str, files: &[&str]) {
    let dir = root.join(layer);
    fs::create_dir_all(&dir).unwrap();
    for file in files {
        fs::write(dir.join(file), b"").unwrap();
    }
}

fn layer_spec(name: &str, bypass: bool) -> LayerSpec {
    LayerSpec {
        name: name.to_string(),
        options: LayerOptions {
            bypass_dna: bypass,
            ..LayerOptions::default()
        },
    }
}

fn batch(grow_to: u32, layers: Vec<LayerSpec>) -> LayerConfigurationSpec {
    LayerConfigurationSpec {
        grow_edition_size_to: grow_to,
        layers_order: layers,
    }
}

/// Two batches of 5 and 3 over a catalog with plenty of combinations.
fn two_batch_fixture(root: &Path) -> EngineConfig {
    write_layer(root, "Background", &["Blue#3.png", "Green.png", "Red#2.png"]);
    write_layer(root, "Eyes", &["Closed.png", "Open.png", "Wink#4.png"]);
    write_layer(root, "Mouth", &["Frown.png", "Smile.png"]);

    let mut config = EngineConfig::new(vec![
        batch(5, vec![layer_spec("Background", false), layer_spec("Eyes", false)]),
        batch(8, vec![layer_spec("Background", false), layer_spec("Mouth", false)]),
    ]);
    config.layers_dir = root.to_path_buf();
    config.name_prefix = "Forge".into();
    config
}

/// Records each job's element ids per layer.
#[derive(Default)]
struct RecordingRenderer {
    jobs: Mutex<Vec<(u32, Vec<u32>)>>,
}

impl Renderer for RecordingRenderer {
    fn render(&self, job: &RenderJob) -> EngineResult<()> {
        let ids = job.layers.iter().map(|l| l.element.id).collect();
        self.jobs.lock().unwrap().push((job.edition, ids));
        Ok(())
    }
}

#[derive(Default)]
struct MemoryStore {
    editions: Vec<u32>,
    aggregate: Vec<u32>,
}

impl MetadataStore for MemoryStore {
    fn write_edition(&mut self, record: &MetadataRecord) -> EngineResult<()> {
        self.editions.push(record.edition());
        Ok(())
    }

    fn write_aggregate(&mut self, records: &[MetadataRecord]) -> EngineResult<()> {
        self.aggregate = records.iter().map(MetadataRecord::edition).collect();
        Ok(())
    }
}

fn run_inline(
    config: &EngineConfig,
    seed: u64,
) -> (EngineResult<u32>, Arc<RecordingRenderer>, MemoryStore) {
    let catalog = LayerCatalog::from_config(config);
    let renderer = Arc::new(RecordingRenderer::default());
    let mut dispatch = RenderDispatch::inline(renderer.clone());
    let mut store = MemoryStore::default();
    let mut scheduler = EditionScheduler::new(config, StdRng::seed_from_u64(seed)).unwrap();
    let result = scheduler
        .run(&catalog, &mut dispatch, &mut store)
        .map(|summary| summary.editions);
    (result, renderer, store)
}

#[test]
fn invariant_indices_cover_pool_exactly_once() {
    let tmp = tempfile::tempdir().unwrap();
    let config = two_batch_fixture(tmp.path());

    let (result, renderer, store) = run_inline(&config, 11);
    assert_eq!(result.unwrap(), 8);

    let rendered: Vec<u32> = renderer.jobs.lock().unwrap().iter().map(|(e, _)| *e).collect();
    assert_eq!(rendered, (1..=8).collect::<Vec<_>>());
    assert_eq!(store.editions, (1..=8).collect::<Vec<_>>());
    assert_eq!(store.aggregate, store.editions);
}

#[test]
fn invariant_shuffle_permutes_but_keeps_index_set() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = two_batch_fixture(tmp.path());
    config.shuffle_layer_configurations = true;

    let (result, _, store) = run_inline(&config, 5);
    assert_eq!(result.unwrap(), 8);

    let set: BTreeSet<u32> = store.editions.iter().copied().collect();
    assert_eq!(store.editions.len(), 8);
    assert_eq!(set, (1..=8).collect::<BTreeSet<_>>());
}

#[test]
fn invariant_solana_indices_start_at_zero() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = two_batch_fixture(tmp.path());
    config.network = Network::Sol;
    config.shuffle_layer_configurations = true;

    let (result, _, store) = run_inline(&config, 5);
    assert_eq!(result.unwrap(), 8);
    let set: BTreeSet<u32> = store.editions.iter().copied().collect();
    assert_eq!(set, (0..8).collect::<BTreeSet<_>>());
}

#[test]
fn invariant_admitted_genomes_are_unique() {
    let tmp = tempfile::tempdir().unwrap();
    write_layer(tmp.path(), "A", &["a1.png", "a2.png", "a3.png"]);
    write_layer(tmp.path(), "B", &["b1.png", "b2.png", "b3.png"]);
    let mut config = EngineConfig::new(vec![batch(
        9,
        vec![layer_spec("A", false), layer_spec("B", false)],
    )]);
    config.layers_dir = tmp.path().to_path_buf();

    // 9 editions from 9 combinations: every one must be distinct.
    let (result, renderer, _) = run_inline(&config, 21);
    assert_eq!(result.unwrap(), 9);

    let keys: HashSet<Vec<u32>> = renderer
        .jobs
        .lock()
        .unwrap()
        .iter()
        .map(|(_, ids)| ids.clone())
        .collect();
    assert_eq!(keys.len(), 9);
}

#[test]
fn invariant_bypass_layer_does_not_count_toward_uniqueness() {
    let tmp = tempfile::tempdir().unwrap();
    write_layer(tmp.path(), "Body", &["b1.png", "b2.png", "b3.png"]);
    write_layer(tmp.path(), "Sparkle", &["s1.png", "s2.png", "s3.png", "s4.png", "s5.png"]);

    let layers = vec![layer_spec("Body", false), layer_spec("Sparkle", true)];
    let mut config = EngineConfig::new(vec![batch(3, layers.clone())]);
    config.layers_dir = tmp.path().to_path_buf();
    config.unique_dna_tolerance = 200;

    let (result, renderer, _) = run_inline(&config, 2);
    assert_eq!(result.unwrap(), 3);
    let bodies: HashSet<u32> = renderer
        .jobs
        .lock()
        .unwrap()
        .iter()
        .map(|(_, ids)| ids[0])
        .collect();
    assert_eq!(bodies.len(), 3);

    // Fifteen raw combinations, but only three canonical keys.
    config.layer_configurations = vec![batch(4, layers)];
    let (result, _, _) = run_inline(&config, 2);
    match result {
        Err(EngineError::Exhausted { batch, target, rejections }) => {
            assert_eq!(batch, 0);
            assert_eq!(target, 4);
            assert_eq!(rejections, 200);
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
}

#[test]
fn invariant_exhaustion_names_second_batch() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = two_batch_fixture(tmp.path());
    // Background x Mouth gives 6 keys; the second batch asks for 7.
    config.layer_configurations[1].grow_edition_size_to = 12;
    config.unique_dna_tolerance = 100;

    let (result, _, store) = run_inline(&config, 8);
    let err = result.unwrap_err();
    assert!(matches!(err, EngineError::Exhausted { batch: 1, target: 7, .. }));
    assert!(err.to_string().contains("to 7 editions"));
    assert!(store.aggregate.is_empty());
}

#[test]
fn invariant_decode_reverses_encode_on_loaded_catalog() {
    let tmp = tempfile::tempdir().unwrap();
    let config = two_batch_fixture(tmp.path());
    let catalog = LayerCatalog::from_config(&config);
    let loaded = catalog.load(0, &config.layer_configurations[0], 5).unwrap();

    for background in &loaded.layers[0].elements {
        for eyes in &loaded.layers[1].elements {
            let selections = vec![
                Selection { layer: &loaded.layers[0], element: background },
                Selection { layer: &loaded.layers[1], element: eyes },
            ];
            let genome = DnaCodec::encode(&selections);
            assert_eq!(DnaCodec::decode(&genome, &loaded.layers).unwrap(), selections);
        }
    }
}

#[test]
fn invariant_unreadable_layer_dir_aborts_before_generation() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = two_batch_fixture(tmp.path());
    config.layer_configurations[1].layers_order.push(layer_spec("Missing", false));

    let (result, renderer, store) = run_inline(&config, 1);
    assert!(matches!(result, Err(EngineError::LayerDirectory { .. })));
    assert!(renderer.jobs.lock().unwrap().is_empty());
    assert!(store.editions.is_empty());
}

#[test]
fn invariant_empty_layer_in_later_batch_aborts_before_generation() {
    let tmp = tempfile::tempdir().unwrap();
    write_layer(tmp.path(), "A", &["a1.png", "a2.png", "a3.png"]);
    write_layer(tmp.path(), "Empty", &[]);
    let mut config = EngineConfig::new(vec![
        batch(2, vec![layer_spec("A", false)]),
        batch(3, vec![layer_spec("Empty", false)]),
    ]);
    config.layers_dir = tmp.path().to_path_buf();

    let (result, renderer, store) = run_inline(&config, 3);
    let err = result.unwrap_err();
    assert!(matches!(err, EngineError::Configuration(_)));
    assert!(err.to_string().contains("'Empty'"));
    assert!(renderer.jobs.lock().unwrap().is_empty());
    assert!(store.editions.is_empty());
    assert!(store.aggregate.is_empty());
}

#[test]
fn invariant_all_bypass_batch_admits_one_edition() {
    let tmp = tempfile::tempdir().unwrap();
    write_layer(tmp.path(), "Glow", &["g1.png", "g2.png", "g3.png"]);
    write_layer(tmp.path(), "Dust", &["d1.png", "d2.png"]);
    let layers = vec![layer_spec("Glow", true), layer_spec("Dust", true)];
    let mut config = EngineConfig::new(vec![batch(1, layers.clone())]);
    config.layers_dir = tmp.path().to_path_buf();
    config.unique_dna_tolerance = 20;

    // Every genome canonicalizes to the empty key, so only the first is admitted.
    let (result, _, _) = run_inline(&config, 6);
    assert_eq!(result.unwrap(), 1);

    config.layer_configurations = vec![batch(2, layers)];
    let (result, _, store) = run_inline(&config, 6);
    assert!(matches!(
        result,
        Err(EngineError::Exhausted { batch: 0, target: 2, rejections: 20 })
    ));
    assert_eq!(store.editions.len(), 1);
}

/// Edition 1 blocks until released; editions 2 and 3 fail at once.
struct StallingRenderer {
    release: Mutex<mpsc::Receiver<()>>,
}

impl Renderer for StallingRenderer {
    fn render(&self, job: &RenderJob) -> EngineResult<()> {
        match job.edition {
            1 => {
                let release = self.release.lock().unwrap();
                let _ = release.recv_timeout(Duration::from_secs(30));
                Ok(())
            }
            2 | 3 => Err(EngineError::render(job.edition, "canvas failure")),
            _ => Ok(()),
        }
    }
}

#[test]
fn invariant_pooled_failure_aborts_without_waiting() {
    let tmp = tempfile::tempdir().unwrap();
    let config = two_batch_fixture(tmp.path());
    let catalog = LayerCatalog::from_config(&config);

    let (release_tx, release_rx) = mpsc::channel();
    let renderer = Arc::new(StallingRenderer {
        release: Mutex::new(release_rx),
    });
    let mut dispatch = RenderDispatch::pooled(renderer, 2).unwrap();
    let mut store = MemoryStore::default();
    let mut scheduler = EditionScheduler::new(&config, StdRng::seed_from_u64(4)).unwrap();

    let started = Instant::now();
    let err = scheduler.run(&catalog, &mut dispatch, &mut store).unwrap_err();
    let elapsed = started.elapsed();
    let _ = release_tx.send(());

    assert!(matches!(err, EngineError::Render { edition: 2 | 3, .. }));
    assert!(elapsed < Duration::from_secs(10), "abort waited {elapsed:?}");
    assert_eq!(scheduler.state(), RunState::Aborted);
    assert!(store.aggregate.is_empty());
}

#[test]
fn invariant_full_build_writes_images_and_metadata() {
    let tmp = tempfile::tempdir().unwrap();
    let layers = tmp.path().join("layers");
    for (layer, names) in [("Background", ["Blue#2", "Red"]), ("Eyes", ["Open", "Shut"])] {
        fs::create_dir_all(layers.join(layer)).unwrap();
        for name in names {
            image::RgbaImage::from_pixel(4, 4, image::Rgba([10, 20, 30, 255]))
                .save(layers.join(layer).join(format!("{name}.png")))
                .unwrap();
        }
    }

    let mut config = EngineConfig::new(vec![batch(
        4,
        vec![layer_spec("Background", false), layer_spec("Eyes", false)],
    )]);
    config.layers_dir = layers;
    config.build_dir = tmp.path().join("build");
    config.format.width = 4;
    config.format.height = 4;
    config.render_performance = PerformanceTier::Workers(2);
    config.seed = Some(99);

    let summary = build_collection(&config).unwrap();
    assert_eq!(summary.editions, 4);
    assert_eq!(summary.rendered, 4);
    assert_eq!(summary.manifest_hash.len(), 64);

    let build = tmp.path().join("build");
    for edition in 1..=4 {
        assert!(build.join("images").join(format!("{edition}.png")).is_file());
        assert!(build.join("json").join(format!("{edition}.json")).is_file());
    }
    let raw = fs::read_to_string(build.join("json/_metadata.json")).unwrap();
    let aggregate: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let records = aggregate.as_array().unwrap();
    assert_eq!(records.len(), 4);
    assert_eq!(records[0]["attributes"][0]["trait_type"], "Background");
}
