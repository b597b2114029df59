//! Ordered execution of one grounded operation batch.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::errors::{PilotError, PilotResult};
use crate::executor::actuator::Actuator;
use crate::grounding::resolver::GroundingResolver;
use crate::knowledge::{KnowledgeLookup, ANSWER_NOT_FOUND};
use crate::operations::Operation;
use crate::session::Session;
use crate::steplog::StepLogger;

/// Give the UI a moment to settle before each input.
pub const SETTLE_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct BatchOutcome {
    /// Set when the batch contained `done`; the session is over.
    pub done_summary: Option<String>,
    /// Quiz rounds are bookkeeping, not progress; they don't count against
    /// the iteration cap.
    pub consumed_iteration: bool,
}

pub struct BatchExecutor {
    actuator: Arc<dyn Actuator>,
    resolver: Arc<GroundingResolver>,
    knowledge: Arc<dyn KnowledgeLookup>,
    settle: Duration,
}

impl BatchExecutor {
    pub fn new(
        actuator: Arc<dyn Actuator>,
        resolver: Arc<GroundingResolver>,
        knowledge: Arc<dyn KnowledgeLookup>,
    ) -> Self {
        Self { actuator, resolver, knowledge, settle: SETTLE_PAUSE }
    }

    #[cfg(test)]
    pub(crate) fn without_settle(mut self) -> Self {
        self.settle = Duration::ZERO;
        self
    }

    /// Execute operations strictly in order. `done` ends the batch at once;
    /// anything after it never runs.
    pub async fn run_batch(
        &self,
        operations: Vec<Operation>,
        session: &mut Session,
        logger: &mut StepLogger,
    ) -> PilotResult<BatchOutcome> {
        let mut outcome = BatchOutcome { done_summary: None, consumed_iteration: true };

        for op in operations {
            tokio::time::sleep(self.settle).await;
            let started = Utc::now();
            let kind = op.kind();

            match op {
                Operation::Click { text, label, x, y } => {
                    let (x, y) = match (x, y) {
                        (Some(x), Some(y)) => (x.0, y.0),
                        _ => {
                            return Err(PilotError::execution(
                                "click",
                                "click reached the actuator without coordinates",
                            ))
                        }
                    };
                    self.actuator.click(x, y).await?;
                    let detail = text
                        .or(label)
                        .unwrap_or_else(|| format!("({x:.2}, {y:.2})"));
                    logger.record_step(kind, &detail, started);
                }
                Operation::Write { content } => {
                    self.actuator.write(&content).await?;
                    logger.record_step(kind, &content, started);
                }
                Operation::WriteIn { label, content, x, y } => {
                    let (x, y) = match (x, y) {
                        (Some(x), Some(y)) => (x.0, y.0),
                        _ => {
                            return Err(PilotError::execution(
                                "write_in",
                                format!("field '{label}' was never resolved to coordinates"),
                            ))
                        }
                    };
                    self.actuator.click(x, y).await?;
                    self.actuator.write(&content).await?;
                    logger.record_step(kind, &label, started);
                }
                Operation::Scroll { direction } => {
                    self.actuator.scroll(direction).await?;
                    logger.record_step(kind, &direction.to_string(), started);
                }
                Operation::Press { keys } => {
                    self.actuator.press(&keys).await?;
                    logger.record_step(kind, &keys.join("+"), started);
                }
                Operation::SolveQuiz { question, choices } => {
                    self.solve_quiz(&question, &choices, session).await?;
                    logger.record_step(kind, &question, started);
                    outcome.consumed_iteration = false;
                }
                Operation::Done { summary } => {
                    logger.record_step(kind, &summary, started);
                    tracing::info!(summary = %summary, "objective reported complete");
                    outcome.done_summary = Some(summary);
                    break;
                }
                Operation::ReadTextFrom { anchor } => {
                    // Consumed during grounding; nothing to actuate.
                    tracing::debug!(anchor = %anchor, "read_text_from reached executor, skipping");
                }
            }
        }

        Ok(outcome)
    }

    /// Look the question up, find the stored answer on a fresh screenshot and
    /// click it. The synthetic assistant message keeps the conversation
    /// coherent for the next planning round.
    async fn solve_quiz(
        &self,
        question: &str,
        choices: &[String],
        session: &mut Session,
    ) -> PilotResult<()> {
        let answer = self.knowledge.answer(question, choices).await?;
        if answer == ANSWER_NOT_FOUND {
            return Err(PilotError::execution(
                "solve_quiz",
                format!("no stored answer for '{question}'"),
            ));
        }

        let shot = self.actuator.capture_screenshot().await?;
        let (x, y) = self.resolver.locate_text_on(&shot, &answer).await?;
        self.actuator.click(x, y).await?;

        tracing::info!(question = %question, answer = %answer, "quiz answered");
        session
            .conversation
            .push_assistant(format!("Answered the quiz question with \"{answer}\"."));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::grounding::types::{BoundingBox, Screenshot, TextDetection};
    use crate::grounding::{ElementDetector, OcrEngine};
    use crate::llm::dispatch::SYSTEM_PROMPT;
    use crate::operations::{Coord, ScrollDirection};

    #[derive(Default)]
    struct RecordingActuator {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingActuator {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
        fn log(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl Actuator for RecordingActuator {
        async fn click(&self, x: f64, y: f64) -> PilotResult<()> {
            self.log(format!("click {x:.2} {y:.2}"));
            Ok(())
        }
        async fn write(&self, text: &str) -> PilotResult<()> {
            self.log(format!("write {text}"));
            Ok(())
        }
        async fn press(&self, keys: &[String]) -> PilotResult<()> {
            self.log(format!("press {}", keys.join("+")));
            Ok(())
        }
        async fn scroll(&self, direction: ScrollDirection) -> PilotResult<()> {
            self.log(format!("scroll {direction}"));
            Ok(())
        }
        async fn capture_screenshot(&self) -> PilotResult<Screenshot> {
            self.log("capture".into());
            let mut png = Vec::new();
            image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
                100,
                100,
                image::Rgba([255, 255, 255, 255]),
            ))
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
            Ok(Screenshot { png, width: 100, height: 100 })
        }
    }

    struct StaticOcr(Vec<TextDetection>);

    #[async_trait]
    impl OcrEngine for StaticOcr {
        async fn detect_text(&self, _shot: &Screenshot) -> PilotResult<Vec<TextDetection>> {
            Ok(self.0.clone())
        }
    }

    struct NoDetector;

    #[async_trait]
    impl ElementDetector for NoDetector {
        async fn detect_labeled_elements(
            &self,
            _shot: &Screenshot,
        ) -> PilotResult<HashMap<String, BoundingBox>> {
            Ok(HashMap::new())
        }
    }

    struct FixedAnswer(&'static str);

    #[async_trait]
    impl KnowledgeLookup for FixedAnswer {
        async fn answer(&self, _question: &str, _choices: &[String]) -> PilotResult<String> {
            Ok(self.0.to_string())
        }
    }

    fn executor_with(
        actuator: Arc<RecordingActuator>,
        answer: &'static str,
        detections: Vec<TextDetection>,
    ) -> BatchExecutor {
        let resolver = Arc::new(GroundingResolver::new(
            Arc::new(StaticOcr(detections)),
            Arc::new(NoDetector),
        ));
        BatchExecutor::new(actuator, resolver, Arc::new(FixedAnswer(answer))).without_settle()
    }

    fn session() -> Session {
        Session::new("objective", SYSTEM_PROMPT)
    }

    fn logger() -> StepLogger {
        StepLogger::new("objective", "test", &std::env::temp_dir())
    }

    fn grounded_click(x: f64, y: f64) -> Operation {
        Operation::Click { text: None, label: None, x: Some(Coord(x)), y: Some(Coord(y)) }
    }

    #[tokio::test]
    async fn operations_execute_in_order_with_one_record_each() {
        let actuator = Arc::new(RecordingActuator::default());
        let executor = executor_with(actuator.clone(), ANSWER_NOT_FOUND, vec![]);
        let mut session = session();
        let mut logger = logger();

        let outcome = executor
            .run_batch(
                vec![
                    grounded_click(0.5, 0.5),
                    Operation::Write { content: "hello".into() },
                    Operation::Press { keys: vec!["enter".into()] },
                ],
                &mut session,
                &mut logger,
            )
            .await
            .unwrap();

        assert_eq!(
            actuator.calls(),
            vec!["click 0.50 0.50", "write hello", "press enter"]
        );
        assert_eq!(logger.step_count(), 3);
        assert!(outcome.consumed_iteration);
        assert!(outcome.done_summary.is_none());
    }

    #[tokio::test]
    async fn done_stops_the_batch_immediately() {
        let actuator = Arc::new(RecordingActuator::default());
        let executor = executor_with(actuator.clone(), ANSWER_NOT_FOUND, vec![]);
        let mut session = session();
        let mut logger = logger();

        let outcome = executor
            .run_batch(
                vec![
                    Operation::Done { summary: "Task finished".into() },
                    grounded_click(0.5, 0.5),
                ],
                &mut session,
                &mut logger,
            )
            .await
            .unwrap();

        assert_eq!(outcome.done_summary.as_deref(), Some("Task finished"));
        assert!(actuator.calls().is_empty());
        assert_eq!(logger.step_count(), 1);
    }

    #[tokio::test]
    async fn ungrounded_click_is_an_execution_error() {
        let actuator = Arc::new(RecordingActuator::default());
        let executor = executor_with(actuator.clone(), ANSWER_NOT_FOUND, vec![]);
        let mut session = session();
        let mut logger = logger();

        let err = executor
            .run_batch(
                vec![Operation::Click { text: None, label: None, x: None, y: None }],
                &mut session,
                &mut logger,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PilotError::Execution { .. }));
        assert!(err.is_transient());
        assert!(actuator.calls().is_empty());
    }

    #[tokio::test]
    async fn write_in_clicks_then_types() {
        let actuator = Arc::new(RecordingActuator::default());
        let executor = executor_with(actuator.clone(), ANSWER_NOT_FOUND, vec![]);
        let mut session = session();
        let mut logger = logger();

        executor
            .run_batch(
                vec![Operation::WriteIn {
                    label: "Search".into(),
                    content: "weather".into(),
                    x: Some(Coord(0.3)),
                    y: Some(Coord(0.4)),
                }],
                &mut session,
                &mut logger,
            )
            .await
            .unwrap();

        assert_eq!(actuator.calls(), vec!["click 0.30 0.40", "write weather"]);
    }

    #[tokio::test]
    async fn solve_quiz_clicks_the_answer_and_spares_the_iteration() {
        let actuator = Arc::new(RecordingActuator::default());
        let detections = vec![TextDetection {
            bbox: BoundingBox::new(40.0, 40.0, 60.0, 60.0),
            text: "Paris".into(),
            confidence: 0.95,
        }];
        let executor = executor_with(actuator.clone(), "Paris", detections);
        let mut session = session();
        let mut logger = logger();

        let outcome = executor
            .run_batch(
                vec![Operation::SolveQuiz {
                    question: "Capital of France?".into(),
                    choices: vec!["Paris".into(), "Lyon".into()],
                }],
                &mut session,
                &mut logger,
            )
            .await
            .unwrap();

        assert!(!outcome.consumed_iteration);
        assert_eq!(actuator.calls(), vec!["capture", "click 0.50 0.50"]);
        // synthetic assistant turn keeps history coherent
        assert!(!session.conversation.is_first_turn());
    }

    #[tokio::test]
    async fn missing_quiz_answer_is_an_execution_error() {
        let actuator = Arc::new(RecordingActuator::default());
        let executor = executor_with(actuator.clone(), ANSWER_NOT_FOUND, vec![]);
        let mut session = session();
        let mut logger = logger();

        let err = executor
            .run_batch(
                vec![Operation::SolveQuiz { question: "?".into(), choices: vec![] }],
                &mut session,
                &mut logger,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PilotError::Execution { .. }));
    }
}
