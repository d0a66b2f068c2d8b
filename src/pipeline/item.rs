//! Per-item step pipeline.
//!
//! Step order is fixed:
//! cleanup-stale → fetch → split → cleanup-fetch → mkdir → extract:<target>… → cleanup-work
//!
//! A failing mandatory step ends the item; cleanup failures are only logged.

use crate::exec::{CommandRunner, CommandSpec, OutputSink};
use crate::models::{Config, ItemRecord, StepFailure, ToolSpec, render_template};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Whether a step's failure ends the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Mandatory,
    /// Best-effort: failures are logged and ignored
    Cleanup,
}

/// One step of an item's pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: String,
    pub kind: StepKind,
    pub command: CommandSpec,
}

/// Ordered steps for one item, fixed at construction.
#[derive(Debug, Clone)]
pub struct PipelineSpec {
    pub item_id: String,
    pub output_dir: PathBuf,
    pub steps: Vec<Step>,
}

impl PipelineSpec {
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }
}

/// Outcome of an item whose mandatory steps all succeeded.
#[derive(Debug, Clone)]
pub struct ItemReport {
    pub item_id: String,
    pub output_dir: PathBuf,
    pub steps_run: usize,
    pub cleanup_failures: usize,
    pub elapsed: Duration,
}

/// Builds and runs the step pipeline for each item.
#[derive(Debug, Clone)]
pub struct ItemPipeline {
    config: Config,
}

impl ItemPipeline {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run-level setup command, executed once before the first item.
    pub fn setup_command(&self) -> Option<CommandSpec> {
        let vars = HashMap::from([("threads", self.config.execution.threads.to_string())]);
        self.config
            .tools
            .setup
            .as_ref()
            .map(|tool| {
                self.tool_command(tool, &vars)
                    .in_dir(&self.config.execution.work_dir)
            })
    }

    /// Construct the step list for `item`.
    pub fn plan(&self, item: &ItemRecord) -> PipelineSpec {
        let exec = &self.config.execution;
        let cleanup = &self.config.cleanup;
        let output_dir = item.output_dir(&exec.output_root);

        let vars = HashMap::from([
            ("id", item.id.clone()),
            ("threads", exec.threads.to_string()),
        ]);
        let render_all = |templates: &[String]| -> Vec<String> {
            templates.iter().map(|t| render_template(t, &vars)).collect()
        };

        let mut steps = Vec::new();

        if !cleanup.stale.is_empty() {
            let script = format!("rm -rf {}", render_all(&cleanup.stale).join(" "));
            steps.push(self.step("cleanup-stale", StepKind::Cleanup, CommandSpec::shell(script)));
        }

        steps.push(self.step(
            "fetch",
            StepKind::Mandatory,
            self.tool_command(&self.config.tools.fetch, &vars),
        ));
        steps.push(self.step(
            "split",
            StepKind::Mandatory,
            self.tool_command(&self.config.tools.split, &vars),
        ));

        if !cleanup.fetch_artifacts.is_empty() {
            let args = ["-rf".to_string()]
                .into_iter()
                .chain(render_all(&cleanup.fetch_artifacts));
            steps.push(self.step(
                "cleanup-fetch",
                StepKind::Cleanup,
                CommandSpec::program("rm", args),
            ));
        }

        steps.push(self.step(
            "mkdir",
            StepKind::Mandatory,
            CommandSpec::program(
                "mkdir",
                ["-p".to_string(), output_dir.to_string_lossy().into_owned()],
            ),
        ));

        for target in &self.config.targets {
            let mut target_vars = vars.clone();
            target_vars.insert(
                "output",
                output_dir.join(&target.name).to_string_lossy().into_owned(),
            );
            target_vars.insert("target", target.name.clone());
            target_vars.insert("mode", target.mode.clone());

            steps.push(self.step(
                &format!("extract:{}", target.name),
                StepKind::Mandatory,
                self.tool_command(&self.config.tools.extract, &target_vars),
            ));
        }

        if !cleanup.work_files.is_empty() {
            let args = ["-f".to_string()]
                .into_iter()
                .chain(render_all(&cleanup.work_files));
            steps.push(self.step(
                "cleanup-work",
                StepKind::Cleanup,
                CommandSpec::program("rm", args),
            ));
        }

        PipelineSpec {
            item_id: item.id.clone(),
            output_dir,
            steps,
        }
    }

    /// Run every step for `item` in order.
    ///
    /// Returns the first mandatory step failure; later steps are not invoked.
    pub async fn run(
        &self,
        item: &ItemRecord,
        runner: &dyn CommandRunner,
        sink: &dyn OutputSink,
    ) -> Result<ItemReport, StepFailure> {
        let spec = self.plan(item);
        let started = Instant::now();
        let mut cleanup_failures = 0;

        for step in &spec.steps {
            let step_start = Instant::now();
            info!(item = %spec.item_id, step = %step.name, command = %step.command, "Step started");

            match runner.run(&step.command, sink).await {
                Ok(()) => {
                    info!(
                        item = %spec.item_id,
                        step = %step.name,
                        elapsed_secs = format!("{:.1}", step_start.elapsed().as_secs_f64()),
                        "Step done"
                    );
                }
                Err(e) if step.kind == StepKind::Cleanup => {
                    cleanup_failures += 1;
                    warn!(item = %spec.item_id, step = %step.name, error = %e, "Cleanup failed, continuing");
                }
                Err(e) => {
                    return Err(StepFailure {
                        item_id: spec.item_id.clone(),
                        step: step.name.clone(),
                        source: e,
                    });
                }
            }
        }

        Ok(ItemReport {
            item_id: spec.item_id,
            output_dir: spec.output_dir,
            steps_run: spec.steps.len(),
            cleanup_failures,
            elapsed: started.elapsed(),
        })
    }

    fn step(&self, name: &str, kind: StepKind, command: CommandSpec) -> Step {
        Step {
            name: name.to_string(),
            kind,
            command: command.in_dir(&self.config.execution.work_dir),
        }
    }

    fn tool_command(&self, tool: &ToolSpec, vars: &HashMap<&str, String>) -> CommandSpec {
        CommandSpec::program(
            tool.program.clone(),
            tool.args.iter().map(|a| render_template(a, vars)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{CommandKind, NullSink, StepOutcome};
    use crate::models::ExecError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every command; fails those running `fail_program`.
    struct ScriptedRunner {
        calls: Mutex<Vec<CommandSpec>>,
        fail_program: Option<&'static str>,
    }

    impl ScriptedRunner {
        fn new(fail_program: Option<&'static str>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_program,
            }
        }

        fn programs(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|c| c.to_string())
                .collect()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, command: &CommandSpec, _sink: &dyn OutputSink) -> StepOutcome {
            self.calls.lock().unwrap().push(command.clone());
            match self.fail_program {
                Some(p) if command.program_name() == p => Err(ExecError::Exit {
                    program: p.to_string(),
                    code: Some(1),
                }),
                _ => Ok(()),
            }
        }
    }

    fn trifolium() -> ItemRecord {
        ItemRecord::new("SRR1", &["Rosales", "Fabaceae", "Trifolium"])
    }

    #[test]
    fn test_plan_step_order() {
        let pipeline = ItemPipeline::new(Config::default());
        let spec = pipeline.plan(&trifolium());

        assert_eq!(
            spec.step_names(),
            vec![
                "cleanup-stale",
                "fetch",
                "split",
                "cleanup-fetch",
                "mkdir",
                "extract:pt",
                "extract:mt",
                "cleanup-work",
            ]
        );
        assert_eq!(spec.output_dir, PathBuf::from("data/Rosales/Fabaceae/Trifolium.SRR1"));
    }

    #[test]
    fn test_plan_renders_commands() {
        let pipeline = ItemPipeline::new(Config::default());
        let spec = pipeline.plan(&trifolium());
        let commands: Vec<String> = spec.steps.iter().map(|s| s.command.to_string()).collect();

        assert_eq!(commands[0], r#"sh -c "rm -rf SRR*""#);
        assert_eq!(commands[1], "prefetch -p SRR1 --max-size 150G");
        assert_eq!(commands[2], "fastq-dump -I --split-files SRR1");
        assert_eq!(commands[3], "rm -rf SRR1");
        assert_eq!(commands[4], "mkdir -p data/Rosales/Fabaceae/Trifolium.SRR1");
        assert_eq!(
            commands[5],
            "get_organelle_from_reads.py -1 SRR1_1.fastq -2 SRR1_2.fastq \
             -o data/Rosales/Fabaceae/Trifolium.SRR1/pt -R 30 -k 21,45,65,85,105 \
             -F embplant_pt -t 24"
        );
        assert!(commands[6].contains("-o data/Rosales/Fabaceae/Trifolium.SRR1/mt"));
        assert!(commands[6].contains("-F embplant_mt"));
        assert_eq!(commands[7], "rm -f SRR1_1.fastq SRR1_2.fastq");
    }

    #[test]
    fn test_plan_uses_work_dir() {
        let mut config = Config::default();
        config.execution.work_dir = PathBuf::from("/scratch/run");
        let pipeline = ItemPipeline::new(config);

        let spec = pipeline.plan(&trifolium());
        assert!(spec
            .steps
            .iter()
            .all(|s| s.command.cwd.as_deref() == Some(std::path::Path::new("/scratch/run"))));
        assert_eq!(
            pipeline.setup_command().unwrap().to_string(),
            "get_organelle_config.py -a embplant_pt,embplant_mt"
        );
    }

    #[test]
    fn test_empty_cleanup_lists_drop_steps() {
        let mut config = Config::default();
        config.cleanup.stale.clear();
        config.cleanup.work_files.clear();
        let spec = ItemPipeline::new(config).plan(&trifolium());
        assert_eq!(
            spec.step_names(),
            vec!["fetch", "split", "cleanup-fetch", "mkdir", "extract:pt", "extract:mt"]
        );
    }

    #[tokio::test]
    async fn test_run_all_steps() {
        let pipeline = ItemPipeline::new(Config::default());
        let runner = ScriptedRunner::new(None);

        let report = pipeline.run(&trifolium(), &runner, &NullSink).await.unwrap();

        assert_eq!(report.steps_run, 8);
        assert_eq!(report.cleanup_failures, 0);
        assert_eq!(runner.programs().len(), 8);
    }

    #[tokio::test]
    async fn test_fetch_failure_stops_item() {
        let pipeline = ItemPipeline::new(Config::default());
        let runner = ScriptedRunner::new(Some("prefetch"));

        let failure = pipeline
            .run(&trifolium(), &runner, &NullSink)
            .await
            .unwrap_err();

        assert_eq!(failure.step, "fetch");
        assert_eq!(failure.item_id, "SRR1");
        assert_eq!(failure.source.exit_code(), Some(1));
        // Only the stale cleanup and the failed fetch ran
        assert_eq!(runner.programs().len(), 2);
    }

    #[tokio::test]
    async fn test_cleanup_failure_does_not_stop_item() {
        let pipeline = ItemPipeline::new(Config::default());
        let runner = ScriptedRunner::new(Some("rm"));

        let report = pipeline.run(&trifolium(), &runner, &NullSink).await.unwrap();

        // All three cleanup steps run `rm`
        assert_eq!(report.cleanup_failures, 3);
        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 8);
        assert!(matches!(calls[0].kind, CommandKind::Shell(_)));
    }

    #[tokio::test]
    async fn test_second_extract_failure_skips_final_cleanup() {
        let mut config = Config::default();
        config.targets[1].mode = "broken".to_string();
        config.tools.extract.program = "extract".to_string();
        let pipeline = ItemPipeline::new(config);

        struct FailMode;
        #[async_trait]
        impl CommandRunner for FailMode {
            async fn run(&self, command: &CommandSpec, _sink: &dyn OutputSink) -> StepOutcome {
                match &command.kind {
                    CommandKind::Program { args, .. } if args.iter().any(|a| a == "broken") => {
                        Err(ExecError::Exit {
                            program: "extract".to_string(),
                            code: Some(2),
                        })
                    }
                    _ => Ok(()),
                }
            }
        }

        let failure = pipeline
            .run(&trifolium(), &FailMode, &NullSink)
            .await
            .unwrap_err();
        assert_eq!(failure.step, "extract:mt");
    }
}
