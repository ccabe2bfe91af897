//! Built-in browser action set

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::actions::context::ActionContext;
use crate::actions::{Action, ActionResult, parse_params};
use crate::errors::{ActionError, BrowserError};

/// All built-in actions, in registration order.
pub(crate) fn all() -> Vec<Box<dyn Action>> {
    vec![
        Box::new(DoneAction),
        Box::new(GoToUrlAction),
        Box::new(ClickElementAction),
        Box::new(InputTextAction),
        Box::new(ScrollAction),
        Box::new(GetDropdownOptionsAction),
        Box::new(SelectDropdownOptionAction),
        Box::new(OpenTabAction),
        Box::new(SwitchTabAction),
        Box::new(CloseTabAction),
        Box::new(WaitAction),
        Box::new(CacheContentAction),
    ]
}

fn schema_of<T: JsonSchema>() -> Value {
    let schema = schemars::SchemaGenerator::default().into_root_schema_for::<T>();
    serde_json::to_value(schema).unwrap_or_else(|_| json!({ "type": "object" }))
}

/// Fold a driver error into a failed result, letting the sentinels through
/// untouched so the engine can react to them.
fn fold_driver_error(action: &str, err: BrowserError) -> Result<ActionResult, ActionError> {
    match err {
        BrowserError::NavigationNotAllowed(_) => Err(ActionError::NavigationNotAllowed(err)),
        other => {
            warn!(action, error = %other, "driver call failed");
            Ok(ActionResult::failure(format!("{action} failed: {other}")))
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DoneParams {
    /// Final answer presented to the user.
    pub text: String,
    /// Whether the task was accomplished.
    pub success: bool,
}

/// Marks the task complete. Remaining actions of the same turn are skipped.
pub struct DoneAction;

#[async_trait::async_trait]
impl Action for DoneAction {
    fn name(&self) -> &'static str {
        "done"
    }

    fn description(&self) -> &'static str {
        "Complete the task and report the final answer. Use only when the task is finished."
    }

    fn param_schema(&self) -> Value {
        schema_of::<DoneParams>()
    }

    async fn execute(
        &self,
        params: Value,
        _ctx: &ActionContext,
    ) -> Result<ActionResult, ActionError> {
        let p: DoneParams = parse_params(params)?;
        Ok(ActionResult::done(p.text, p.success))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GoToUrlParams {
    /// Destination URL, including the scheme.
    pub url: String,
}

pub struct GoToUrlAction;

#[async_trait::async_trait]
impl Action for GoToUrlAction {
    fn name(&self) -> &'static str {
        "go_to_url"
    }

    fn description(&self) -> &'static str {
        "Navigate the current tab to a URL."
    }

    fn param_schema(&self) -> Value {
        schema_of::<GoToUrlParams>()
    }

    fn changes_page(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        params: Value,
        ctx: &ActionContext,
    ) -> Result<ActionResult, ActionError> {
        let p: GoToUrlParams = parse_params(params)?;
        url::Url::parse(&p.url)
            .map_err(|e| ActionError::InvalidInput(format!("invalid url {:?}: {e}", p.url)))?;
        match ctx.driver.navigate_to(&p.url).await {
            Ok(()) => Ok(ActionResult::ok_with(format!("Navigated to {}", p.url))),
            Err(e) => fold_driver_error(self.name(), e),
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ClickElementParams {
    /// Highlight index of the element, from the current element list.
    pub index: u32,
}

pub struct ClickElementAction;

#[async_trait::async_trait]
impl Action for ClickElementAction {
    fn name(&self) -> &'static str {
        "click_element"
    }

    fn description(&self) -> &'static str {
        "Click an interactive element by its highlight index."
    }

    fn param_schema(&self) -> Value {
        schema_of::<ClickElementParams>()
    }

    fn targets_element(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        params: Value,
        ctx: &ActionContext,
    ) -> Result<ActionResult, ActionError> {
        let p: ClickElementParams = parse_params(params)?;
        let element = ctx.resolve_element(p.index).await?;
        match ctx.driver.click(&element).await {
            Ok(()) => Ok(
                ActionResult::ok_with(format!("Clicked element [{}] <{}>", p.index, element.tag))
                    .with_element(p.index),
            ),
            Err(e) => fold_driver_error(self.name(), e),
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct InputTextParams {
    /// Highlight index of the input element.
    pub index: u32,
    /// Text to type into the element.
    pub text: String,
}

pub struct InputTextAction;

#[async_trait::async_trait]
impl Action for InputTextAction {
    fn name(&self) -> &'static str {
        "input_text"
    }

    fn description(&self) -> &'static str {
        "Type text into an input element by its highlight index."
    }

    fn param_schema(&self) -> Value {
        schema_of::<InputTextParams>()
    }

    fn targets_element(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        params: Value,
        ctx: &ActionContext,
    ) -> Result<ActionResult, ActionError> {
        let p: InputTextParams = parse_params(params)?;
        let element = ctx.resolve_element(p.index).await?;
        match ctx.driver.input_text(&element, &p.text).await {
            Ok(()) => Ok(
                ActionResult::ok_with(format!("Typed into element [{}]", p.index))
                    .with_element(p.index),
            ),
            Err(e) => fold_driver_error(self.name(), e),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ScrollParams {
    /// Direction to scroll.
    pub direction: ScrollDirection,
    /// Distance in pixels; one viewport height when omitted.
    #[serde(default)]
    pub amount: Option<u32>,
}

pub struct ScrollAction;

#[async_trait::async_trait]
impl Action for ScrollAction {
    fn name(&self) -> &'static str {
        "scroll"
    }

    fn description(&self) -> &'static str {
        "Scroll the page up or down, by a pixel amount or one viewport."
    }

    fn param_schema(&self) -> Value {
        schema_of::<ScrollParams>()
    }

    async fn execute(
        &self,
        params: Value,
        ctx: &ActionContext,
    ) -> Result<ActionResult, ActionError> {
        let p: ScrollParams = parse_params(params)?;
        let requested = p.amount.unwrap_or(720) as i64;
        let amount = requested.clamp(1, 10_000);
        if amount != requested {
            warn!(requested, amount, "scroll amount clamped");
        }
        let delta = match p.direction {
            ScrollDirection::Up => -amount,
            ScrollDirection::Down => amount,
        };
        match ctx.driver.scroll(delta).await {
            Ok(()) => Ok(ActionResult::ok_with(format!("Scrolled {delta} px"))),
            Err(e) => fold_driver_error(self.name(), e),
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetDropdownOptionsParams {
    /// Highlight index of the select element.
    pub index: u32,
}

pub struct GetDropdownOptionsAction;

#[async_trait::async_trait]
impl Action for GetDropdownOptionsAction {
    fn name(&self) -> &'static str {
        "get_dropdown_options"
    }

    fn description(&self) -> &'static str {
        "List the options of a dropdown element by its highlight index."
    }

    fn param_schema(&self) -> Value {
        schema_of::<GetDropdownOptionsParams>()
    }

    fn targets_element(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        params: Value,
        ctx: &ActionContext,
    ) -> Result<ActionResult, ActionError> {
        let p: GetDropdownOptionsParams = parse_params(params)?;
        let element = ctx.resolve_element(p.index).await?;
        match ctx.driver.get_dropdown_options(&element).await {
            Ok(options) => {
                Ok(ActionResult::ok_with(options.join("\n")).with_element(p.index))
            }
            Err(e) => fold_driver_error(self.name(), e),
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SelectDropdownOptionParams {
    /// Highlight index of the select element.
    pub index: u32,
    /// Exact visible text of the option to select.
    pub text: String,
}

pub struct SelectDropdownOptionAction;

#[async_trait::async_trait]
impl Action for SelectDropdownOptionAction {
    fn name(&self) -> &'static str {
        "select_dropdown_option"
    }

    fn description(&self) -> &'static str {
        "Select a dropdown option by its visible text."
    }

    fn param_schema(&self) -> Value {
        schema_of::<SelectDropdownOptionParams>()
    }

    fn targets_element(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        params: Value,
        ctx: &ActionContext,
    ) -> Result<ActionResult, ActionError> {
        let p: SelectDropdownOptionParams = parse_params(params)?;
        let element = ctx.resolve_element(p.index).await?;
        match ctx.driver.select_dropdown_option(&element, &p.text).await {
            Ok(()) => Ok(
                ActionResult::ok_with(format!("Selected option {:?}", p.text))
                    .with_element(p.index),
            ),
            Err(e) => fold_driver_error(self.name(), e),
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct OpenTabParams {
    /// URL to open in the new tab.
    pub url: String,
}

pub struct OpenTabAction;

#[async_trait::async_trait]
impl Action for OpenTabAction {
    fn name(&self) -> &'static str {
        "open_tab"
    }

    fn description(&self) -> &'static str {
        "Open a new tab at the given URL and switch to it."
    }

    fn param_schema(&self) -> Value {
        schema_of::<OpenTabParams>()
    }

    fn changes_page(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        params: Value,
        ctx: &ActionContext,
    ) -> Result<ActionResult, ActionError> {
        let p: OpenTabParams = parse_params(params)?;
        url::Url::parse(&p.url)
            .map_err(|e| ActionError::InvalidInput(format!("invalid url {:?}: {e}", p.url)))?;
        match ctx.driver.open_tab(&p.url).await {
            Ok(()) => Ok(ActionResult::ok_with(format!("Opened tab at {}", p.url))),
            Err(e) => fold_driver_error(self.name(), e),
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SwitchTabParams {
    /// Id of the tab to activate, from the tab list.
    pub tab_id: i64,
}

pub struct SwitchTabAction;

#[async_trait::async_trait]
impl Action for SwitchTabAction {
    fn name(&self) -> &'static str {
        "switch_tab"
    }

    fn description(&self) -> &'static str {
        "Switch to an open tab by id."
    }

    fn param_schema(&self) -> Value {
        schema_of::<SwitchTabParams>()
    }

    fn changes_page(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        params: Value,
        ctx: &ActionContext,
    ) -> Result<ActionResult, ActionError> {
        let p: SwitchTabParams = parse_params(params)?;
        match ctx.driver.switch_tab(p.tab_id).await {
            Ok(()) => Ok(ActionResult::ok_with(format!("Switched to tab {}", p.tab_id))),
            Err(e) => fold_driver_error(self.name(), e),
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CloseTabParams {
    /// Id of the tab to close.
    pub tab_id: i64,
}

pub struct CloseTabAction;

#[async_trait::async_trait]
impl Action for CloseTabAction {
    fn name(&self) -> &'static str {
        "close_tab"
    }

    fn description(&self) -> &'static str {
        "Close an open tab by id."
    }

    fn param_schema(&self) -> Value {
        schema_of::<CloseTabParams>()
    }

    fn changes_page(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        params: Value,
        ctx: &ActionContext,
    ) -> Result<ActionResult, ActionError> {
        let p: CloseTabParams = parse_params(params)?;
        match ctx.driver.close_tab(p.tab_id).await {
            Ok(()) => Ok(ActionResult::ok_with(format!("Closed tab {}", p.tab_id))),
            Err(e) => fold_driver_error(self.name(), e),
        }
    }
}

/// Upper bound for `wait`; anything longer should be a new step.
const MAX_WAIT_SECS: u64 = 30;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WaitParams {
    /// Seconds to wait; defaults to 3.
    #[serde(default)]
    pub seconds: Option<u64>,
}

pub struct WaitAction;

#[async_trait::async_trait]
impl Action for WaitAction {
    fn name(&self) -> &'static str {
        "wait"
    }

    fn description(&self) -> &'static str {
        "Wait for the page to settle before the next action."
    }

    fn param_schema(&self) -> Value {
        schema_of::<WaitParams>()
    }

    async fn execute(
        &self,
        params: Value,
        ctx: &ActionContext,
    ) -> Result<ActionResult, ActionError> {
        let p: WaitParams = parse_params(params)?;
        let seconds = p.seconds.unwrap_or(3).min(MAX_WAIT_SECS);
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs(seconds)) => {
                Ok(ActionResult::ok_with(format!("Waited {seconds}s")))
            }
            _ = ctx.cancel.cancelled() => Err(ActionError::Cancelled),
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CacheContentParams {
    /// Finding worth remembering for later steps.
    pub content: String,
}

/// Stores a model-extracted finding into conversational memory.
pub struct CacheContentAction;

#[async_trait::async_trait]
impl Action for CacheContentAction {
    fn name(&self) -> &'static str {
        "cache_content"
    }

    fn description(&self) -> &'static str {
        "Record an extracted finding so later steps can reference it."
    }

    fn param_schema(&self) -> Value {
        schema_of::<CacheContentParams>()
    }

    async fn execute(
        &self,
        params: Value,
        _ctx: &ActionContext,
    ) -> Result<ActionResult, ActionError> {
        let p: CacheContentParams = parse_params(params)?;
        Ok(ActionResult::ok_retained(p.content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionRegistry;
    use crate::actions::tests::test_ctx;

    #[tokio::test]
    async fn done_short_circuits_with_answer() {
        let registry = ActionRegistry::builtin();
        let result = registry
            .invoke(
                "done",
                serde_json::json!({"text": "42", "success": true}),
                &test_ctx(),
            )
            .await
            .unwrap();
        assert!(result.is_done);
        assert_eq!(result.extracted_content.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn click_with_stale_index_is_invalid_input() {
        let registry = ActionRegistry::builtin();
        // Context has no snapshot, so any index is unresolvable.
        let err = registry
            .invoke("click_element", serde_json::json!({"index": 5}), &test_ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn scroll_clamps_excessive_amounts() {
        let registry = ActionRegistry::builtin();
        let result = registry
            .invoke(
                "scroll",
                serde_json::json!({"direction": "down", "amount": 999_999}),
                &test_ctx(),
            )
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.extracted_content.as_deref(), Some("Scrolled 10000 px"));
    }

    #[test]
    fn every_builtin_has_an_object_schema() {
        for action in all() {
            let schema = action.param_schema();
            assert!(schema.is_object(), "{} schema not an object", action.name());
        }
    }

    #[tokio::test]
    async fn cached_findings_are_retained_but_confirmations_are_not() {
        let registry = ActionRegistry::builtin();
        let cached = registry
            .invoke(
                "cache_content",
                serde_json::json!({"content": "price is 12.99"}),
                &test_ctx(),
            )
            .await
            .unwrap();
        assert!(cached.include_in_memory);

        let navigated = registry
            .invoke(
                "go_to_url",
                serde_json::json!({"url": "https://example.com"}),
                &test_ctx(),
            )
            .await
            .unwrap();
        assert!(!navigated.include_in_memory);
    }

    #[test]
    fn page_changing_actions_are_flagged() {
        let registry = ActionRegistry::builtin();
        for name in ["go_to_url", "open_tab", "switch_tab", "close_tab"] {
            assert!(registry.get(name).unwrap().changes_page(), "{name}");
        }
        for name in ["click_element", "scroll", "done", "cache_content"] {
            assert!(!registry.get(name).unwrap().changes_page(), "{name}");
        }
    }
}
