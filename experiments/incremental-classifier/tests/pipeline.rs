use cilrun_core::{
    Experiment, ExperimentConfig, ImbalanceMetric, MemorySinks, Reporter, SharedBuffer,
};
use cilrun_incremental::{registry, CandleRuntime, TaskDataManager};
use serde_json::json;

fn small_config(model: &str, imb_metrics: bool) -> ExperimentConfig {
    let mut config = ExperimentConfig {
        prefix: "pipeline".into(),
        dataset: "gaussian".into(),
        model_name: model.into(),
        init_cls: 2,
        increment: 2,
        imb_metrics,
        seed: vec![1993],
        device: vec![-1],
        ..ExperimentConfig::default()
    };
    config.params.clear();
    for (key, value) in [
        ("synthetic_classes", json!(6)),
        ("synthetic_dim", json!(8)),
        ("train_per_class", json!(24)),
        ("test_per_class", json!(8)),
        ("hidden_dim", json!(16)),
        ("epochs", json!(2)),
        ("batch_size", json!(16)),
        ("lr", json!(0.01)),
        ("memory_per_class", json!(4)),
    ] {
        config.params.insert(key.into(), value);
    }
    config
}

fn experiment(sinks: &MemorySinks, output: &SharedBuffer) -> Experiment<TaskDataManager> {
    Experiment::new(
        registry(),
        Box::new(TaskDataManager::from_config),
        Box::new(CandleRuntime),
        Box::new(sinks.clone()),
        Reporter::new(Box::new(output.clone())),
    )
}

#[test]
fn replay_reports_both_heads_for_every_task() {
    let sinks = MemorySinks::default();
    let output = SharedBuffer::default();
    let summaries = experiment(&sinks, &output)
        .run(&small_config("replay", false))
        .unwrap();

    assert_eq!(summaries.len(), 1);
    let summary = &summaries[0];
    assert_eq!(summary.context.nb_tasks, 3);
    assert_eq!(summary.context.input_dim, 8);
    assert!(summary
        .log_path
        .ends_with("logs/replay/gaussian/0/2/pipeline_1993_mlp.log"));

    let metrics = &summary.metrics;
    assert_eq!(metrics.cnn_curve().len(), 3);
    assert_eq!(metrics.nme_curve().len(), 3);
    assert_eq!(metrics.accuracy_table().unwrap().unwrap().dim(), (3, 3));

    let opened = sinks.opened();
    assert_eq!(opened.len(), 1);
    let log = &opened[0].1;
    assert!(log.contains("model_name: replay"));
    assert!(log.contains("CNN: {'total': "));
    assert!(log.contains("NME: {'total': "));
    assert!(!log.contains("No NME accuracy."));

    let printed = output.contents();
    assert!(printed.contains("Average Accuracy (NME)"));
    assert!(printed.contains("Accuracy Matrix (CNN)"));
}

#[test]
fn finetune_with_imbalance_metrics_has_no_nme() {
    let sinks = MemorySinks::default();
    let output = SharedBuffer::default();
    let summaries = experiment(&sinks, &output)
        .run(&small_config("finetune", true))
        .unwrap();

    let metrics = &summaries[0].metrics;
    assert_eq!(metrics.cnn_curve().len(), 3);
    assert!(metrics.nme_curve().is_empty());
    for metric in ImbalanceMetric::ALL {
        assert_eq!(metrics.imbalance_curve(metric).len(), 3);
        assert_eq!(metrics.imbalance_matrix(metric).unwrap().len(), 3);
    }

    let log = &sinks.opened()[0].1;
    assert_eq!(
        log.lines()
            .iter()
            .filter(|line| line.as_str() == "No NME accuracy.")
            .count(),
        3
    );

    let printed = output.contents();
    assert!(printed.contains("Average F1_SCORE (CNN)"));
    assert!(printed.contains("### Average Imbalance Metrics (CNN) ###"));
}

#[test]
fn same_seed_gives_same_results() {
    let run = || {
        let sinks = MemorySinks::default();
        let output = SharedBuffer::default();
        experiment(&sinks, &output)
            .run(&small_config("finetune", false))
            .unwrap()
            .remove(0)
    };

    let first = run();
    let second = run();
    assert_eq!(
        first.metrics.cnn_curve().top1,
        second.metrics.cnn_curve().top1
    );
}

#[test]
fn every_seed_gets_its_own_log() {
    let sinks = MemorySinks::default();
    let output = SharedBuffer::default();
    let mut config = small_config("finetune", false);
    config.seed = vec![1, 2];

    let summaries = experiment(&sinks, &output).run(&config).unwrap();
    assert_eq!(summaries.len(), 2);

    let paths: Vec<_> = sinks.opened().into_iter().map(|(path, _)| path).collect();
    assert_eq!(paths.len(), 2);
    assert_ne!(paths[0], paths[1]);
}

#[test]
fn unknown_model_fails_the_run() {
    let sinks = MemorySinks::default();
    let output = SharedBuffer::default();
    let err = experiment(&sinks, &output)
        .run(&small_config("icarl", false))
        .unwrap_err();
    assert!(format!("{err:#}").contains("unknown model `icarl`"));
}
