//! Provider dispatcher: one iteration's screenshot → request → parse →
//! ground pipeline, including the single fallback hop to the baseline
//! provider.

use std::sync::Arc;

use crate::errors::{PilotError, PilotResult};
use crate::executor::actuator::Actuator;
use crate::grounding::detector::annotate_labels;
use crate::grounding::resolver::{GroundOutcome, GroundingMode, GroundingResolver};
use crate::grounding::types::Screenshot;
use crate::llm::adapter::{RawReply, VisionAdapter};
use crate::llm::parser::parse_operations;
use crate::llm::registry::AdapterRegistry;
use crate::operations::Operation;
use crate::session::{Content, Session};

pub const SYSTEM_PROMPT: &str = "You operate a desktop computer by looking at \
screenshots. Reply with a JSON array of operations, nothing else. Available \
operations: click (by on-screen text, element label, or normalized x/y), \
write, write_in, scroll (up/down), press (key list), solve_quiz, \
read_text_from, and done when the objective is complete.";

pub const BASELINE_SYSTEM_PROMPT: &str = "You operate a desktop computer by \
looking at screenshots. Reply with a JSON array of operations, nothing else. \
Target elements by the exact text visible on them. Available operations: \
click, write, write_in, scroll, press, solve_quiz, read_text_from, done.";

fn first_turn_prompt(objective: &str) -> String {
    format!("Objective: {objective}\nHere is the current screen. What operations come next?")
}

const CONTINUATION_PROMPT: &str =
    "The previous operations were performed. Here is the current screen. What operations come next?";

pub struct Dispatcher {
    registry: Arc<AdapterRegistry>,
    resolver: Arc<GroundingResolver>,
    actuator: Arc<dyn Actuator>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        resolver: Arc<GroundingResolver>,
        actuator: Arc<dyn Actuator>,
    ) -> Self {
        Self { registry, resolver, actuator }
    }

    /// Run one planning round against `provider_id` and return a grounded
    /// operation batch. On an adapter failure that is neither fatal nor a
    /// grounding miss, or on a label-table miss, hop once to the baseline
    /// provider with the system message swapped out. No recursion past that
    /// hop.
    pub async fn resolve_next_action(
        &self,
        provider_id: &str,
        session: &mut Session,
    ) -> PilotResult<Vec<Operation>> {
        let adapter = self.registry.get(provider_id)?;

        let shot = self.actuator.capture_screenshot().await?;
        let mut label_table = None;
        let image_base64 = if adapter.capabilities().grounding == GroundingMode::LabelTable {
            let table = self.resolver.build_label_table(&shot).await?;
            let annotated = annotate_labels(&shot, &table)?;
            label_table = Some(table);
            base64_png(&annotated)
        } else {
            shot.to_base64()
        };

        let text = if session.conversation.is_first_turn() {
            first_turn_prompt(&session.objective)
        } else {
            CONTINUATION_PROMPT.to_string()
        };
        session.conversation.push_user(Content::Multimodal { text, image_base64 });

        match self
            .run_adapter(adapter.as_ref(), session, &shot, label_table.as_ref())
            .await
        {
            Ok(Some(operations)) => Ok(operations),
            Ok(None) => {
                tracing::warn!(provider = %adapter.id(), "label table miss, falling back");
                self.fallback_hop(session, &shot).await
            }
            Err(e) if matches!(e, PilotError::Grounding(_)) || !e.is_transient() => Err(e),
            Err(e) => {
                tracing::warn!(provider = %adapter.id(), error = %e, "adapter failed, falling back");
                self.fallback_hop(session, &shot).await
            }
        }
    }

    /// `Ok(None)` signals a label-table miss; the caller decides what to do
    /// with it.
    async fn run_adapter(
        &self,
        adapter: &dyn VisionAdapter,
        session: &mut Session,
        shot: &Screenshot,
        label_table: Option<&std::collections::HashMap<String, crate::grounding::types::BoundingBox>>,
    ) -> PilotResult<Option<Vec<Operation>>> {
        let caps = adapter.capabilities();
        let mut validation_failures = 0u32;

        loop {
            let reply = adapter.send(&session.conversation).await?;

            let (operations, raw_text) = match reply {
                RawReply::QuizCall { question, choices } => {
                    let ops = vec![Operation::SolveQuiz { question, choices }];
                    let raw = serde_json::to_string(&ops)?;
                    (ops, raw)
                }
                RawReply::Text(text) => match parse_operations(&text) {
                    Ok(ops) => (ops, text),
                    Err(e) => {
                        validation_failures += 1;
                        if validation_failures < caps.self_correction_attempts {
                            tracing::warn!(
                                provider = %adapter.id(),
                                attempt = validation_failures,
                                error = %e,
                                "malformed reply, re-asking the same provider"
                            );
                            continue;
                        }
                        if caps.self_correction_attempts > 0 {
                            return Err(PilotError::execution(
                                "self_correction",
                                format!("provider '{}' kept replying malformed: {e}", adapter.id()),
                            ));
                        }
                        return Err(e);
                    }
                },
            };

            let outcome = match label_table {
                Some(table) => self.resolver.ground_with_table(operations, shot, table),
                None => {
                    self.resolver
                        .ground_batch(caps.grounding, operations, shot)
                        .await?
                }
            };

            return match outcome {
                GroundOutcome::Grounded { operations, read_texts } => {
                    for text in &read_texts {
                        tracing::info!(text = %text, "read from screen");
                    }
                    // Appended only after the reply survived parsing and
                    // grounding, so a failed round never pollutes history.
                    session.conversation.push_assistant(raw_text);
                    Ok(Some(operations))
                }
                GroundOutcome::LabelMiss { label } => {
                    tracing::debug!(label = %label, "label not in detector table");
                    Ok(None)
                }
            };
        }
    }

    async fn fallback_hop(
        &self,
        session: &mut Session,
        shot: &Screenshot,
    ) -> PilotResult<Vec<Operation>> {
        let baseline = self.registry.baseline();
        session.conversation.replace_system(BASELINE_SYSTEM_PROMPT);
        tracing::info!(provider = %baseline.id(), "fallback hop to baseline provider");

        match self.run_adapter(baseline.as_ref(), session, shot, None).await? {
            Some(operations) => Ok(operations),
            None => Err(PilotError::Grounding(
                "baseline provider produced an unresolvable label target".into(),
            )),
        }
    }
}

fn base64_png(png: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(png)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::grounding::types::{BoundingBox, TextDetection};
    use crate::grounding::{ElementDetector, OcrEngine};
    use crate::llm::adapter::AdapterCapabilities;
    use crate::operations::{Coord, ScrollDirection};

    struct ScriptedAdapter {
        id: String,
        capabilities: AdapterCapabilities,
        replies: Mutex<Vec<PilotResult<RawReply>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedAdapter {
        fn new(id: &str, grounding: GroundingMode, replies: Vec<PilotResult<RawReply>>) -> Self {
            Self {
                id: id.into(),
                capabilities: AdapterCapabilities {
                    grounding,
                    self_correction_attempts: 0,
                    quiz_tool: false,
                },
                replies: Mutex::new(replies),
                calls: Mutex::new(0),
            }
        }

        fn with_self_correction(mut self, attempts: u32) -> Self {
            self.capabilities.self_correction_attempts = attempts;
            self
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl VisionAdapter for ScriptedAdapter {
        fn id(&self) -> &str {
            &self.id
        }
        fn display_name(&self) -> &str {
            &self.id
        }
        fn capabilities(&self) -> &AdapterCapabilities {
            &self.capabilities
        }
        async fn send(&self, _conversation: &crate::session::Conversation) -> PilotResult<RawReply> {
            *self.calls.lock().unwrap() += 1;
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(PilotError::Upstream("script exhausted".into()));
            }
            replies.remove(0)
        }
    }

    struct StaticOcr(Vec<TextDetection>);

    #[async_trait]
    impl OcrEngine for StaticOcr {
        async fn detect_text(&self, _shot: &Screenshot) -> PilotResult<Vec<TextDetection>> {
            Ok(self.0.clone())
        }
    }

    struct StaticDetector(HashMap<String, BoundingBox>);

    #[async_trait]
    impl ElementDetector for StaticDetector {
        async fn detect_labeled_elements(
            &self,
            _shot: &Screenshot,
        ) -> PilotResult<HashMap<String, BoundingBox>> {
            Ok(self.0.clone())
        }
    }

    struct StubActuator;

    #[async_trait]
    impl Actuator for StubActuator {
        async fn click(&self, _x: f64, _y: f64) -> PilotResult<()> {
            Ok(())
        }
        async fn write(&self, _text: &str) -> PilotResult<()> {
            Ok(())
        }
        async fn press(&self, _keys: &[String]) -> PilotResult<()> {
            Ok(())
        }
        async fn scroll(&self, _direction: ScrollDirection) -> PilotResult<()> {
            Ok(())
        }
        async fn capture_screenshot(&self) -> PilotResult<Screenshot> {
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

    fn dispatcher_with(
        adapters: Vec<Arc<ScriptedAdapter>>,
        baseline_id: &str,
        detections: Vec<TextDetection>,
        labels: HashMap<String, BoundingBox>,
    ) -> Dispatcher {
        let mut table: HashMap<String, Arc<dyn VisionAdapter>> = HashMap::new();
        for a in adapters {
            table.insert(a.id().to_string(), a);
        }
        let registry = Arc::new(AdapterRegistry::from_parts(table, baseline_id.to_string()));
        let resolver = Arc::new(GroundingResolver::new(
            Arc::new(StaticOcr(detections)),
            Arc::new(StaticDetector(labels)),
        ));
        Dispatcher::new(registry, resolver, Arc::new(StubActuator))
    }

    fn settings_detection() -> TextDetection {
        TextDetection {
            bbox: BoundingBox::new(70.0, 2.0, 90.0, 8.0),
            text: "Settings".into(),
            confidence: 0.9,
        }
    }

    fn session() -> Session {
        Session::new("open settings", SYSTEM_PROMPT)
    }

    #[tokio::test]
    async fn unknown_provider_fails_before_any_adapter_call() {
        let adapter = Arc::new(ScriptedAdapter::new(
            "base",
            GroundingMode::Coordinates,
            vec![],
        ));
        let dispatcher = dispatcher_with(vec![adapter.clone()], "base", vec![], HashMap::new());

        let mut session = session();
        let err = dispatcher
            .resolve_next_action("nope", &mut session)
            .await
            .unwrap_err();
        assert!(matches!(err, PilotError::UnrecognizedProvider(_)));
        assert_eq!(adapter.calls(), 0);
        // no user message was appended either
        assert_eq!(session.conversation.len(), 1);
    }

    #[tokio::test]
    async fn text_reply_is_parsed_and_grounded() {
        let adapter = Arc::new(ScriptedAdapter::new(
            "ocr",
            GroundingMode::OcrText,
            vec![Ok(RawReply::Text(
                r#"[{"operation":"click","text":"Settings"}]"#.into(),
            ))],
        ));
        let dispatcher = dispatcher_with(
            vec![adapter],
            "ocr",
            vec![settings_detection()],
            HashMap::new(),
        );

        let mut session = session();
        let ops = dispatcher.resolve_next_action("ocr", &mut session).await.unwrap();
        assert_eq!(ops.len(), 1);
        let (x, y) = ops[0].point().unwrap();
        assert!((x - 0.8).abs() < 1e-6);
        assert!((y - 0.05).abs() < 1e-6);
        // system + user + assistant
        assert_eq!(session.conversation.len(), 3);
        assert!(!session.conversation.is_first_turn());
    }

    #[tokio::test]
    async fn quiz_call_bypasses_the_parser() {
        let adapter = Arc::new(ScriptedAdapter::new(
            "gem",
            GroundingMode::Coordinates,
            vec![Ok(RawReply::QuizCall {
                question: "capital of France?".into(),
                choices: vec!["Paris".into(), "Lyon".into()],
            })],
        ));
        let dispatcher = dispatcher_with(vec![adapter], "gem", vec![], HashMap::new());

        let mut session = session();
        let ops = dispatcher.resolve_next_action("gem", &mut session).await.unwrap();
        assert_eq!(
            ops,
            vec![Operation::SolveQuiz {
                question: "capital of France?".into(),
                choices: vec!["Paris".into(), "Lyon".into()],
            }]
        );
    }

    #[tokio::test]
    async fn upstream_failure_triggers_one_fallback_hop() {
        let failing = Arc::new(ScriptedAdapter::new(
            "gem",
            GroundingMode::Coordinates,
            vec![Err(PilotError::Upstream("500".into()))],
        ));
        let baseline = Arc::new(ScriptedAdapter::new(
            "base",
            GroundingMode::OcrText,
            vec![Ok(RawReply::Text(
                r#"[{"operation":"click","text":"Settings"}]"#.into(),
            ))],
        ));
        let dispatcher = dispatcher_with(
            vec![failing.clone(), baseline.clone()],
            "base",
            vec![settings_detection()],
            HashMap::new(),
        );

        let mut session = session();
        let ops = dispatcher.resolve_next_action("gem", &mut session).await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(failing.calls(), 1);
        assert_eq!(baseline.calls(), 1);
        assert_eq!(
            session.conversation.system().unwrap().content.text(),
            BASELINE_SYSTEM_PROMPT
        );
    }

    #[tokio::test]
    async fn label_miss_falls_back_instead_of_failing() {
        let mut labels = HashMap::new();
        labels.insert("~1".to_string(), BoundingBox::new(10.0, 10.0, 20.0, 20.0));
        let som = Arc::new(ScriptedAdapter::new(
            "som",
            GroundingMode::LabelTable,
            vec![Ok(RawReply::Text(
                r#"[{"operation":"click","label":"~9"}]"#.into(),
            ))],
        ));
        let baseline = Arc::new(ScriptedAdapter::new(
            "base",
            GroundingMode::OcrText,
            vec![Ok(RawReply::Text(
                r#"[{"operation":"click","text":"Settings"}]"#.into(),
            ))],
        ));
        let dispatcher = dispatcher_with(
            vec![som, baseline.clone()],
            "base",
            vec![settings_detection()],
            labels,
        );

        let mut session = session();
        let ops = dispatcher.resolve_next_action("som", &mut session).await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(baseline.calls(), 1);
    }

    #[tokio::test]
    async fn grounding_failure_propagates_without_fallback() {
        let adapter = Arc::new(ScriptedAdapter::new(
            "ocr",
            GroundingMode::OcrText,
            vec![Ok(RawReply::Text(
                r#"[{"operation":"click","text":"Nowhere"}]"#.into(),
            ))],
        ));
        let baseline = Arc::new(ScriptedAdapter::new("base", GroundingMode::OcrText, vec![]));
        let dispatcher = dispatcher_with(
            vec![adapter, baseline.clone()],
            "base",
            vec![settings_detection()],
            HashMap::new(),
        );

        let mut session = session();
        let err = dispatcher
            .resolve_next_action("ocr", &mut session)
            .await
            .unwrap_err();
        assert!(matches!(err, PilotError::Grounding(_)));
        assert_eq!(baseline.calls(), 0);
        // failed round leaves no assistant message behind
        assert!(session.conversation.is_first_turn());
    }

    #[tokio::test]
    async fn self_correction_retries_then_succeeds() {
        let adapter = Arc::new(
            ScriptedAdapter::new(
                "gem",
                GroundingMode::Coordinates,
                vec![
                    Ok(RawReply::Text("gibberish".into())),
                    Ok(RawReply::Text("still gibberish".into())),
                    Ok(RawReply::Text(
                        r#"[{"operation":"scroll","direction":"down"}]"#.into(),
                    )),
                ],
            )
            .with_self_correction(3),
        );
        let dispatcher = dispatcher_with(vec![adapter.clone()], "gem", vec![], HashMap::new());

        let mut session = session();
        let ops = dispatcher.resolve_next_action("gem", &mut session).await.unwrap();
        assert_eq!(ops, vec![Operation::Scroll { direction: ScrollDirection::Down }]);
        assert_eq!(adapter.calls(), 3);
    }

    #[tokio::test]
    async fn self_correction_exhaustion_is_an_execution_error_then_fallback() {
        let adapter = Arc::new(
            ScriptedAdapter::new(
                "gem",
                GroundingMode::Coordinates,
                vec![
                    Ok(RawReply::Text("a".into())),
                    Ok(RawReply::Text("b".into())),
                    Ok(RawReply::Text("c".into())),
                ],
            )
            .with_self_correction(3),
        );
        let baseline = Arc::new(ScriptedAdapter::new(
            "base",
            GroundingMode::Coordinates,
            vec![Ok(RawReply::Text(
                r#"[{"operation":"click","x":0.5,"y":0.5}]"#.into(),
            ))],
        ));
        let dispatcher = dispatcher_with(
            vec![adapter.clone(), baseline.clone()],
            "base",
            vec![],
            HashMap::new(),
        );

        let mut session = session();
        let ops = dispatcher.resolve_next_action("gem", &mut session).await.unwrap();
        assert_eq!(adapter.calls(), 3);
        assert_eq!(baseline.calls(), 1);
        assert_eq!(
            ops,
            vec![Operation::Click {
                text: None,
                label: None,
                x: Some(Coord(0.5)),
                y: Some(Coord(0.5)),
            }]
        );
    }
}
