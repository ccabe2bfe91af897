//! Task execution engine
//!
//! Drives one task at a time through the planner/navigator step loop:
//! snapshot the page, optionally re-plan, let the navigator pick actions,
//! execute them through the registry, and account every message against the
//! memory budget. Cancellation outranks every other failure classification.

mod events;
mod history;
mod task;

pub use events::{
    Actor, EventCallback, EventManager, ExecutionEvent, ExecutionState, tracing_event_logger,
};
pub use history::{HistoryRecorder, JsonlHistoryRecorder, NullRecorder, StepRecord};
pub use task::{ExecutionStatus, Task, TaskControl};

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actions::{ActionContext, ActionRegistry, ActionResult};
use crate::agent::prompts::{self, StateMessageInput};
use crate::agent::{
    ActionRequest, NavigatorAgent, NavigatorState, PlannerAgent, ValidatorAgent,
};
use crate::browser::{BrowserDriver, PageSnapshot};
use crate::dom::{clickable_fingerprints, mark_new_elements};
use crate::errors::{ActionError, EngineError, EngineResult};
use crate::memory::{Message, MessageCategory, MemoryStore, Role};
use crate::sanitizer::{ContentSanitizer, sanitize_and_wrap};
use crate::transport::ModelTransport;

/// Tunable limits of the step loop.
#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    /// Hard cap on navigator steps per task.
    pub max_steps: usize,
    /// Cap on actions per navigator turn; overflow is truncated.
    pub max_actions_per_step: usize,
    /// Consecutive recoverable failures before the task fails.
    pub max_failures: usize,
    /// Planner cadence: runs when `step % planning_interval == 0`.
    pub planning_interval: usize,
    /// Estimated-token budget of the conversation.
    pub token_budget: usize,
    /// Attach screenshots to page-state messages.
    pub use_vision: bool,
    /// Gate completion behind the validator.
    pub validate_output: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            max_steps: 100,
            max_actions_per_step: 10,
            max_failures: 3,
            planning_interval: 3,
            token_budget: 128_000,
            use_vision: false,
            validate_output: false,
        }
    }
}

/// Terminal report of one task run.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: String,
    pub status: ExecutionStatus,
    pub final_answer: Option<String>,
    pub steps: usize,
}

/// What one executed step asks the loop to do next.
enum StepVerdict {
    Continue,
    Retry(String),
    Done { answer: String, success: bool },
}

/// The collaborators a task run needs, assembled by the caller.
pub struct ExecutorBuilder {
    driver: Arc<dyn BrowserDriver>,
    navigator_transport: Arc<dyn ModelTransport>,
    planner_transport: Option<Arc<dyn ModelTransport>>,
    validator_transport: Option<Arc<dyn ModelTransport>>,
    sanitizer: Arc<dyn ContentSanitizer>,
    recorder: Arc<dyn HistoryRecorder>,
    registry: ActionRegistry,
    settings: ExecutionSettings,
    secrets: std::collections::BTreeMap<String, String>,
}

impl ExecutorBuilder {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        navigator_transport: Arc<dyn ModelTransport>,
    ) -> Self {
        Self {
            driver,
            navigator_transport,
            planner_transport: None,
            validator_transport: None,
            sanitizer: Arc::new(crate::sanitizer::PassthroughSanitizer),
            recorder: Arc::new(NullRecorder),
            registry: ActionRegistry::builtin(),
            settings: ExecutionSettings::default(),
            secrets: Default::default(),
        }
    }

    pub fn planner(mut self, transport: Arc<dyn ModelTransport>) -> Self {
        self.planner_transport = Some(transport);
        self
    }

    pub fn validator(mut self, transport: Arc<dyn ModelTransport>) -> Self {
        self.validator_transport = Some(transport);
        self
    }

    pub fn sanitizer(mut self, sanitizer: Arc<dyn ContentSanitizer>) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn recorder(mut self, recorder: Arc<dyn HistoryRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn registry(mut self, registry: ActionRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn settings(mut self, settings: ExecutionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn secrets(mut self, secrets: std::collections::BTreeMap<String, String>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn build(self) -> Executor {
        let navigator = NavigatorAgent::new(
            self.navigator_transport,
            &self.registry,
            self.settings.max_actions_per_step,
        );
        let memory = MemoryStore::with_secrets(self.settings.token_budget, self.secrets);
        Executor {
            driver: self.driver,
            navigator,
            planner: self.planner_transport.map(PlannerAgent::new),
            validator: self.validator_transport.map(ValidatorAgent::new),
            sanitizer: self.sanitizer,
            recorder: self.recorder,
            registry: self.registry,
            settings: self.settings,
            events: EventManager::new(),
            memory,
            snapshot: Arc::new(Mutex::new(None)),
            previous_fingerprints: None,
            control: TaskControl::new(),
            status: ExecutionStatus::Idle,
        }
    }
}

/// Owns one conversation and runs tasks against it sequentially. Only one
/// task may run at a time; follow-ups extend the same memory.
pub struct Executor {
    driver: Arc<dyn BrowserDriver>,
    navigator: NavigatorAgent,
    planner: Option<PlannerAgent>,
    validator: Option<ValidatorAgent>,
    sanitizer: Arc<dyn ContentSanitizer>,
    recorder: Arc<dyn HistoryRecorder>,
    registry: ActionRegistry,
    settings: ExecutionSettings,
    events: EventManager,
    memory: MemoryStore,
    snapshot: Arc<Mutex<Option<PageSnapshot>>>,
    previous_fingerprints: Option<HashSet<String>>,
    control: TaskControl,
    status: ExecutionStatus,
}

impl Executor {
    pub fn builder(
        driver: Arc<dyn BrowserDriver>,
        navigator_transport: Arc<dyn ModelTransport>,
    ) -> ExecutorBuilder {
        ExecutorBuilder::new(driver, navigator_transport)
    }

    pub fn events(&self) -> &EventManager {
        &self.events
    }

    /// Control handle for the currently running (or next) task.
    pub fn control(&self) -> TaskControl {
        self.control.clone()
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    /// Run a task to a terminal status. Collaborator failures surface as
    /// `Err`; model-level failure to complete the task is a `Failed`
    /// outcome, not an error.
    pub async fn run(&mut self, instructions: impl Into<String>) -> EngineResult<TaskOutcome> {
        let instructions = instructions.into();
        if self.status == ExecutionStatus::Running {
            return Err(EngineError::TaskInProgress(instructions));
        }

        let follow_up = !self.memory.is_empty();
        if follow_up {
            // Keep prior context but drop stale page dumps.
            self.memory.fold_tool_results();
        } else {
            self.memory.add_message(
                Message::system(prompts::navigator_system_prompt(
                    &self.registry.describe(),
                    self.settings.max_actions_per_step,
                )),
                Some(MessageCategory::Init),
                None,
            );
        }
        self.memory.add_message(
            Message::human(prompts::task_message(&instructions, follow_up)),
            Some(MessageCategory::Normal),
            None,
        );

        // A control consumed by a previous task is replaced; a fresh handle
        // handed out before this run stays valid.
        if self.control.is_stopped() || self.control.cancel_token().is_cancelled() {
            self.control = TaskControl::new();
        }
        self.status = ExecutionStatus::Running;
        let mut task = Task::new(instructions);
        let cancel = self.control.cancel_token();

        self.emit(ExecutionState::TaskStart, Actor::Manager, &task, "task started");

        let outcome = self.run_loop(&mut task, &cancel).await;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() || self.control.is_stopped() => {
                self.terminal(&task, ExecutionStatus::Cancelled, "task cancelled")
            }
            Err(e) => {
                let outcome = self.terminal(&task, ExecutionStatus::Failed, e.to_string());
                self.status = outcome.status;
                return Err(e);
            }
        };
        self.status = outcome.status;
        Ok(outcome)
    }

    async fn run_loop(
        &mut self,
        task: &mut Task,
        cancel: &CancellationToken,
    ) -> EngineResult<TaskOutcome> {
        let mut consecutive_failures = 0usize;
        let mut previous_results: Vec<ActionResult> = Vec::new();
        let mut force_plan = false;

        while task.step < self.settings.max_steps {
            if self.control.is_paused() {
                self.status = ExecutionStatus::Paused;
                self.emit(ExecutionState::TaskPause, Actor::Manager, task, "paused");
                let resumed = self.control.wait_if_paused().await;
                self.status = ExecutionStatus::Running;
                if resumed {
                    self.emit(ExecutionState::TaskResume, Actor::Manager, task, "resumed");
                }
            }
            if self.control.is_stopped() || cancel.is_cancelled() {
                return Ok(self.terminal(task, ExecutionStatus::Cancelled, "stop requested"));
            }

            self.emit(ExecutionState::StepStart, Actor::Navigator, task, "step start");

            let verdict = self
                .execute_step(task, &mut previous_results, &mut force_plan, cancel)
                .await;

            match verdict {
                Ok(StepVerdict::Continue) => {
                    consecutive_failures = 0;
                    self.emit(ExecutionState::StepOk, Actor::Navigator, task, "step ok");
                    task.step += 1;
                }
                Ok(StepVerdict::Retry(reason)) => {
                    consecutive_failures += 1;
                    self.emit(ExecutionState::StepFail, Actor::Navigator, task, &reason);
                    if consecutive_failures >= self.settings.max_failures {
                        return Ok(self.terminal(
                            task,
                            ExecutionStatus::Failed,
                            format!("{consecutive_failures} consecutive step failures: {reason}"),
                        ));
                    }
                    task.step += 1;
                }
                Ok(StepVerdict::Done { answer, success }) => {
                    task.final_answer = Some(answer.clone());
                    let status = if success {
                        ExecutionStatus::Completed
                    } else {
                        ExecutionStatus::Failed
                    };
                    let mut outcome = self.terminal(task, status, answer);
                    outcome.final_answer = task.final_answer.clone();
                    return Ok(outcome);
                }
                Err(e) if e.is_cancelled() || self.control.is_stopped() => {
                    return Ok(self.terminal(task, ExecutionStatus::Cancelled, e.to_string()));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    // An abandoned turn (snapshot or memory failure) does
                    // not consume a step; only navigator turns do.
                    consecutive_failures += 1;
                    self.emit(ExecutionState::StepFail, Actor::Navigator, task, e.to_string());
                    if consecutive_failures >= self.settings.max_failures {
                        return Err(e);
                    }
                }
            }
        }

        Ok(self.terminal(
            task,
            ExecutionStatus::Failed,
            format!("maximum steps ({}) reached", self.settings.max_steps),
        ))
    }

    async fn execute_step(
        &mut self,
        task: &mut Task,
        previous_results: &mut Vec<ActionResult>,
        force_plan: &mut bool,
        cancel: &CancellationToken,
    ) -> EngineResult<StepVerdict> {
        let wrapped_elements = self.take_snapshot().await?;

        // Planner runs on its interval (and after a rejected completion),
        // in the same iteration and before the navigator.
        let plan_now = self.planner.is_some()
            && (*force_plan || task.step % self.settings.planning_interval.max(1) == 0);
        if plan_now {
            *force_plan = false;
            if let Some(done) = self.run_planner(task, cancel).await? {
                return Ok(done);
            }
        }

        let state_message = {
            let snapshot = self.snapshot.lock().await;
            let snapshot = snapshot
                .as_ref()
                .ok_or_else(|| EngineError::StepFailed("snapshot missing after refresh".into()))?;
            prompts::state_message(StateMessageInput {
                url: &snapshot.url,
                title: &snapshot.title,
                tabs: &snapshot.tabs,
                wrapped_elements: &wrapped_elements,
                scroll: snapshot.scroll,
                screenshot: if self.settings.use_vision {
                    snapshot.screenshot.as_deref()
                } else {
                    None
                },
                step: task.step,
                max_steps: self.settings.max_steps,
                previous_results,
            })
        };
        self.memory
            .add_message(state_message, Some(MessageCategory::Normal), None);
        self.memory.enforce_budget()?;

        let turn = self
            .navigator
            .navigate(self.memory.messages(), cancel)
            .await?;

        // The page-state message is transient: dropped before the model
        // output is recorded, whatever the turn produced.
        self.memory.remove_last_if(Role::Human);

        let output = match turn.result {
            Ok(output) => output,
            Err(parse_failure) => {
                self.memory.add_message(
                    Message::human(format!(
                        "Your previous response could not be parsed ({parse_failure}). \
                         Respond with a single valid JSON object."
                    )),
                    Some(MessageCategory::Normal),
                    None,
                );
                return Ok(StepVerdict::Retry(format!(
                    "navigator output unparseable: {parse_failure}"
                )));
            }
        };

        if output.actions.is_empty() {
            return Ok(StepVerdict::Retry("navigator emitted no actions".into()));
        }

        let (results, done) = self.run_actions(task, &output.actions, cancel).await?;

        let output_json = serde_json::json!({
            "current_state": output.state,
            "action": output.actions,
        })
        .to_string();
        let retained = results.iter().any(|r| r.include_in_memory);
        self.memory
            .add_model_output(output_json, summarize_results(&results), retained);
        self.memory.enforce_budget()?;

        self.record_step(task, &output.state, &output.actions, &results)
            .await;

        let all_ok = results.iter().all(|r| r.success);
        *previous_results = results;

        if let Some((answer, success)) = done {
            if !success {
                return Ok(StepVerdict::Done { answer, success });
            }
            return self.gate_completion(task, answer, force_plan, cancel).await;
        }

        if all_ok {
            Ok(StepVerdict::Continue)
        } else {
            Ok(StepVerdict::Retry("one or more actions failed".into()))
        }
    }

    /// Refresh the page snapshot, diff element identity against the
    /// previous step, and return the sanitized, wrapped element list.
    async fn take_snapshot(&mut self) -> EngineResult<String> {
        let mut snapshot = self.driver.get_state(self.settings.use_vision).await?;

        mark_new_elements(
            &mut snapshot.tree,
            self.previous_fingerprints.as_ref(),
            &mut snapshot.fingerprints,
        );
        self.previous_fingerprints = Some(clickable_fingerprints(
            &snapshot.tree,
            &mut snapshot.fingerprints,
        ));

        let rendered = snapshot.tree.render_clickable_elements();
        let wrapped = sanitize_and_wrap(self.sanitizer.as_ref(), &rendered, false).await;

        debug!(url = %snapshot.url, elements = snapshot.tree.len(), "page snapshot refreshed");
        *self.snapshot.lock().await = Some(snapshot);
        Ok(wrapped)
    }

    /// One planner review. Returns a verdict only when the planner declares
    /// the task done.
    async fn run_planner(
        &mut self,
        task: &mut Task,
        cancel: &CancellationToken,
    ) -> EngineResult<Option<StepVerdict>> {
        let planner = self
            .planner
            .as_ref()
            .ok_or_else(|| EngineError::StepFailed("planner not configured".into()))?;

        // Planner sees the same conversation under its own system prompt.
        let mut view = Vec::with_capacity(self.memory.len());
        view.push(Message::system(prompts::planner_system_prompt()));
        view.extend(
            self.memory
                .messages()
                .iter()
                .filter(|m| m.role != Role::System)
                .cloned(),
        );

        let review = planner.plan(&view, cancel).await?;
        let plan = match review.result {
            Ok(plan) => plan,
            Err(parse_failure) => {
                warn!(error = %parse_failure, "planner output unparseable, continuing without plan");
                return Ok(None);
            }
        };

        self.emit(
            ExecutionState::StepOk,
            Actor::Planner,
            task,
            &plan.observation,
        );

        if plan.done {
            let answer = plan
                .final_answer
                .clone()
                .unwrap_or_else(|| plan.observation.clone());
            let mut replan = false;
            let verdict = self.gate_completion(task, answer, &mut replan, cancel).await?;
            return Ok(match verdict {
                done @ StepVerdict::Done { .. } => Some(done),
                // Rejected by the validator: fall through to the navigator
                // with the feedback already in memory.
                _ => None,
            });
        }

        let summary = format!(
            "Observation: {}\nChallenges: {}\nNext steps: {}",
            plan.observation, plan.challenges, plan.next_steps
        );
        self.memory.add_plan(&summary, None);
        self.memory.enforce_budget()?;
        Ok(None)
    }

    /// Execute one turn's actions in order, stopping at the first failure
    /// or `done`. A successful page-changing action also ends the turn:
    /// every later index would resolve against the replaced page. Sentinel
    /// errors propagate; input errors become reported failures the model
    /// can react to.
    async fn run_actions(
        &mut self,
        task: &Task,
        actions: &[ActionRequest],
        cancel: &CancellationToken,
    ) -> EngineResult<(Vec<ActionResult>, Option<(String, bool)>)> {
        let ctx = ActionContext {
            driver: self.driver.clone(),
            snapshot: self.snapshot.clone(),
            events: self.events.clone(),
            cancel: cancel.clone(),
            task_id: task.id.clone(),
            step: task.step,
        };

        let mut results = Vec::with_capacity(actions.len());
        let mut done = None;
        for request in actions {
            if self.control.is_stopped() || cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let result = match self
                .registry
                .invoke(&request.name, request.params.clone(), &ctx)
                .await
            {
                Ok(result) => result,
                Err(ActionError::InvalidInput(reason)) => ActionResult::failure(reason),
                Err(sentinel) => return Err(sentinel.into()),
            };

            let failed = !result.success;
            if result.is_done {
                done = Some((
                    result.extracted_content.clone().unwrap_or_default(),
                    result.success,
                ));
            }
            let is_done = result.is_done;
            let page_changed = result.success
                && self
                    .registry
                    .get(&request.name)
                    .is_some_and(|a| a.changes_page());
            results.push(result);
            if failed || is_done {
                break;
            }
            if page_changed {
                let skipped = actions.len() - results.len();
                if skipped > 0 {
                    debug!(action = %request.name, skipped, "page changed, ending turn");
                }
                break;
            }
        }
        Ok((results, done))
    }

    /// A claimed completion passes through the validator when configured;
    /// a rejection becomes feedback in memory and the loop continues.
    async fn gate_completion(
        &mut self,
        task: &mut Task,
        answer: String,
        force_plan: &mut bool,
        cancel: &CancellationToken,
    ) -> EngineResult<StepVerdict> {
        let Some(validator) = self.validator.as_ref() else {
            return Ok(StepVerdict::Done { answer, success: true });
        };
        if !self.settings.validate_output {
            return Ok(StepVerdict::Done { answer, success: true });
        }

        let state_summary = {
            let snapshot = self.snapshot.lock().await;
            snapshot
                .as_ref()
                .map(|s| format!("URL: {}\nTitle: {}", s.url, s.title))
                .unwrap_or_default()
        };
        let messages = vec![
            Message::system(prompts::validator_system_prompt(&task.instructions)),
            Message::human(format!(
                "Final page state:\n{state_summary}\n\nClaimed answer:\n{answer}"
            )),
        ];

        let verdict = validator.validate(&messages, cancel).await?;
        match verdict.result {
            Ok(v) if v.is_valid => {
                let answer = if v.answer.is_empty() { answer } else { v.answer };
                Ok(StepVerdict::Done { answer, success: true })
            }
            Ok(v) => {
                info!(reason = %v.reason, "validator rejected completion");
                self.memory.add_message(
                    Message::human(format!(
                        "The result was rejected by review: {}. Continue working on the task.",
                        v.reason
                    )),
                    Some(MessageCategory::Normal),
                    None,
                );
                *force_plan = true;
                Ok(StepVerdict::Retry(format!("completion rejected: {}", v.reason)))
            }
            Err(parse_failure) => {
                // An unreadable verdict must not discard real work.
                warn!(error = %parse_failure, "validator output unparseable, accepting result");
                Ok(StepVerdict::Done { answer, success: true })
            }
        }
    }

    async fn record_step(
        &self,
        task: &Task,
        state: &NavigatorState,
        actions: &[ActionRequest],
        results: &[ActionResult],
    ) {
        let (url, title) = {
            let snapshot = self.snapshot.lock().await;
            match snapshot.as_ref() {
                Some(s) => (s.url.clone(), s.title.clone()),
                None => (String::new(), String::new()),
            }
        };
        let record = StepRecord {
            task_id: task.id.clone(),
            step: task.step,
            url,
            title,
            navigator_state: Some(state.clone()),
            actions: actions
                .iter()
                .map(|a| {
                    let mut entry = serde_json::Map::new();
                    entry.insert(a.name.clone(), a.params.clone());
                    serde_json::Value::Object(entry)
                })
                .collect(),
            results: results.to_vec(),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.recorder.record(&record).await {
            warn!(error = %e, "step history write failed");
        }
    }

    fn terminal(
        &self,
        task: &Task,
        status: ExecutionStatus,
        details: impl Into<String>,
    ) -> TaskOutcome {
        let state = match status {
            ExecutionStatus::Completed => ExecutionState::TaskOk,
            ExecutionStatus::Cancelled => ExecutionState::TaskCancel,
            _ => ExecutionState::TaskFail,
        };
        self.emit(state, Actor::Manager, task, details);
        TaskOutcome {
            task_id: task.id.clone(),
            status,
            final_answer: task.final_answer.clone(),
            steps: task.step,
        }
    }

    fn emit(
        &self,
        state: ExecutionState,
        actor: Actor,
        task: &Task,
        details: impl Into<String>,
    ) {
        self.events.emit(ExecutionEvent::new(
            state,
            actor,
            &task.id,
            task.step,
            details,
        ));
    }
}

fn summarize_results(results: &[ActionResult]) -> String {
    results
        .iter()
        .map(|r| match (&r.extracted_content, &r.error) {
            (_, Some(error)) => format!("FAILED: {error}"),
            (Some(content), None) => content.clone(),
            (None, None) => "ok".to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_summary_reports_failures_and_contents() {
        let results = vec![
            ActionResult::ok(),
            ActionResult::ok_with("page title: Example"),
            ActionResult::failure("element vanished"),
        ];
        let summary = summarize_results(&results);
        assert_eq!(summary, "ok\npage title: Example\nFAILED: element vanished");
    }
}
