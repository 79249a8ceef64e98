//! The per-message decision pipeline

use super::mode::{DeliveryGate, ScanStrategy};
use crate::delivery::Delivery;
use crate::envelope::{Attachment, MailParserWalker, MessageEnvelope, MimeWalker};
use crate::scan::ScanEngine;
use mailsift_common::types::{Disposition, Finding, FindingOutcome, OperatingMode, Verdict};
use mailsift_storage::StorageLayout;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// Receives fully assembled messages and decides what happens to them
pub struct InspectionRelay {
    mode: OperatingMode,
    strategy: ScanStrategy,
    gate: DeliveryGate,
    engines: Arc<Vec<Arc<dyn ScanEngine>>>,
    storage: StorageLayout,
    delivery: Arc<dyn Delivery>,
    walker: Arc<dyn MimeWalker>,
    save_attachments: bool,
    span: Span,
}

impl InspectionRelay {
    /// Create a relay; every event it emits is parented to `span`
    pub fn new(
        mode: OperatingMode,
        engines: Vec<Arc<dyn ScanEngine>>,
        storage: StorageLayout,
        delivery: Arc<dyn Delivery>,
        span: Span,
    ) -> Self {
        Self {
            mode,
            strategy: ScanStrategy::from_mode(&mode),
            gate: DeliveryGate::from_mode(&mode),
            engines: Arc::new(engines),
            storage,
            delivery,
            walker: Arc::new(MailParserWalker),
            save_attachments: false,
            span,
        }
    }

    /// Persist every extracted attachment after the decision
    pub fn with_save_attachments(mut self, save_attachments: bool) -> Self {
        self.save_attachments = save_attachments;
        self
    }

    /// Replace the MIME walker used for new envelopes
    pub fn with_walker(mut self, walker: Arc<dyn MimeWalker>) -> Self {
        self.walker = walker;
        self
    }

    pub fn engines(&self) -> &[Arc<dyn ScanEngine>] {
        &self.engines
    }

    pub fn storage(&self) -> &StorageLayout {
        &self.storage
    }

    /// Run one message through the pipeline
    ///
    /// Never fails: persistence and delivery problems are logged and the
    /// returned [`Disposition`] records what actually happened.
    pub async fn handle(
        &self,
        peer: &str,
        sender: &str,
        recipients: Vec<String>,
        raw_body: Vec<u8>,
    ) -> Disposition {
        let span = info_span!(
            parent: &self.span,
            "message",
            peer = %peer,
            sender = %sender,
            size = raw_body.len()
        );

        self.process(peer, sender, recipients, raw_body)
            .instrument(span)
            .await
    }

    async fn process(
        &self,
        peer: &str,
        sender: &str,
        recipients: Vec<String>,
        raw_body: Vec<u8>,
    ) -> Disposition {
        let envelope = Arc::new(MessageEnvelope::with_walker(
            peer,
            sender,
            recipients,
            raw_body,
            self.walker.clone(),
        ));
        info!(recipients = ?envelope.recipients(), strategy = %self.strategy, "Received message");

        if self.mode.log_all {
            if let Err(e) = envelope.persist(self.storage.messages.as_ref()).await {
                error!(error = %e, "Failed to log message");
            }
        }

        let mut delivered = false;
        if self.strategy.delivers_before_scan() {
            delivered = self.deliver(&envelope).await;
        }

        let (verdict, attachments) = self.scan(envelope.clone()).await;

        let mut quarantine_path = None;
        if verdict.is_malicious() {
            warn!(
                findings = verdict.findings.len(),
                faults = verdict.fault_count(),
                "Message flagged as malicious"
            );
            match envelope.persist(self.storage.quarantine.as_ref()).await {
                Ok(path) => quarantine_path = Some(path),
                Err(e) => error!(error = %e, "Failed to quarantine message"),
            }
        } else {
            info!(attachments = attachments.len(), "Message is clean");
        }

        if self.strategy.delivers_after_scan(&verdict) {
            delivered = self.deliver(&envelope).await;
        }

        if self.save_attachments && !attachments.is_empty() {
            let report = envelope
                .persist_attachments(self.storage.attachments.as_ref())
                .await;
            if !report.is_complete() {
                for e in &report.errors {
                    error!(error = %e, "Failed to save attachment");
                }
            }
            debug!(saved = report.records.len(), "Saved attachments");
        }

        Disposition {
            verdict,
            delivered,
            quarantine_path,
            attachment_count: attachments.len(),
        }
    }

    /// Hand the message to the next hop unless the gate is closed
    async fn deliver(&self, envelope: &MessageEnvelope) -> bool {
        if !self.gate.allows() {
            debug!("Delivery suppressed by always_block");
            return false;
        }

        match self
            .delivery
            .deliver(envelope.sender(), envelope.recipients(), envelope.raw_body())
            .await
        {
            Ok(()) => info!("Message forwarded"),
            Err(e) => error!(error = %e, "Failed to forward message"),
        }
        true
    }

    /// Extract and scan on the blocking pool
    async fn scan(&self, envelope: Arc<MessageEnvelope>) -> (Verdict, Arc<[Attachment]>) {
        let engines = self.engines.clone();
        let span = Span::current();

        let result = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let attachments = envelope.shared_attachments();
            let verdict = scan_attachments(&engines, &attachments);
            (verdict, attachments)
        })
        .await;

        match result {
            Ok(scanned) => scanned,
            Err(e) => {
                error!(error = %e, "Scan task failed, treating message as malicious");
                let mut verdict = Verdict::clean();
                verdict.record(Finding {
                    attachment: String::new(),
                    engine: "scanner".to_string(),
                    outcome: FindingOutcome::Faulted(e.to_string()),
                });
                (verdict, Arc::from(Vec::new()))
            }
        }
    }
}

impl std::fmt::Debug for InspectionRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InspectionRelay")
            .field("mode", &self.mode)
            .field("engines", &self.engines.len())
            .field("storage", &self.storage)
            .field("save_attachments", &self.save_attachments)
            .finish()
    }
}

/// Every engine against every attachment, no short circuit
///
/// An engine that errors or panics counts as a positive finding.
fn scan_attachments(engines: &[Arc<dyn ScanEngine>], attachments: &[Attachment]) -> Verdict {
    let mut verdict = Verdict::clean();

    for attachment in attachments {
        for engine in engines {
            let outcome = match catch_unwind(AssertUnwindSafe(|| engine.matches(&attachment.content))) {
                Ok(Ok(true)) => {
                    info!(engine = engine.name(), attachment = %attachment.filename, "Attachment flagged");
                    FindingOutcome::Matched
                }
                Ok(Ok(false)) => continue,
                Ok(Err(e)) => {
                    error!(engine = engine.name(), attachment = %attachment.filename, error = %e, "Engine failed");
                    FindingOutcome::Faulted(e.to_string())
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(engine = engine.name(), attachment = %attachment.filename, panic = %message, "Engine panicked");
                    FindingOutcome::Faulted(message)
                }
            };

            verdict.record(Finding {
                attachment: attachment.filename.clone(),
                engine: engine.name().to_string(),
                outcome,
            });
        }
    }

    verdict
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "engine panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{AlwaysPass, CompiledRuleset, PatternMatch};
    use async_trait::async_trait;
    use mailsift_common::{Error, Result};
    use mailsift_storage::layout::{ATTACHMENTS_DIR, MESSAGES_DIR, QUARANTINE_DIR};
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const ONE_ATTACHMENT: &str = "From: alice@example.com\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"B\"\r\n\
\r\n\
--B\r\n\
Content-Type: text/plain\r\n\
\r\n\
hello\r\n\
--B\r\n\
Content-Type: application/octet-stream\r\n\
Content-Disposition: attachment; filename=\"tool.bin\"\r\n\
\r\n\
some tool bytes\r\n\
--B--\r\n";

    const TWO_ATTACHMENTS: &str = "From: alice@example.com\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"B\"\r\n\
\r\n\
--B\r\n\
Content-Type: text/plain; name=\"readme.txt\"\r\n\
\r\n\
nothing interesting here\r\n\
--B\r\n\
Content-Type: application/octet-stream\r\n\
Content-Disposition: attachment; filename=\"dropper.bin\"\r\n\
\r\n\
header EVIL-MARKER-42 trailer\r\n\
--B--\r\n";

    const NO_ATTACHMENTS: &str = "From: alice@example.com\r\nSubject: hi\r\n\r\nJust text.\r\n";

    #[derive(Default)]
    struct RecordingDelivery {
        sent: Mutex<Vec<(String, Vec<String>, Vec<u8>)>>,
    }

    impl RecordingDelivery {
        fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Delivery for RecordingDelivery {
        async fn deliver(&self, sender: &str, recipients: &[String], raw_body: &[u8]) -> Result<()> {
            self.sent.lock().unwrap().push((
                sender.to_string(),
                recipients.to_vec(),
                raw_body.to_vec(),
            ));
            Ok(())
        }
    }

    struct FailingDelivery;

    #[async_trait]
    impl Delivery for FailingDelivery {
        async fn deliver(&self, _: &str, _: &[String], _: &[u8]) -> Result<()> {
            Err(Error::Delivery("connection refused".to_string()))
        }
    }

    struct FlagEverything;

    impl ScanEngine for FlagEverything {
        fn name(&self) -> &str {
            "flag_everything"
        }

        fn matches(&self, _content: &[u8]) -> Result<bool> {
            Ok(true)
        }
    }

    struct ErroringEngine;

    impl ScanEngine for ErroringEngine {
        fn name(&self) -> &str {
            "erroring"
        }

        fn matches(&self, _content: &[u8]) -> Result<bool> {
            Err(Error::Scan("scanner unavailable".to_string()))
        }
    }

    struct PanickingEngine;

    impl ScanEngine for PanickingEngine {
        fn name(&self) -> &str {
            "panicking"
        }

        fn matches(&self, _content: &[u8]) -> Result<bool> {
            panic!("corrupt state");
        }
    }

    fn marker_engine() -> Arc<dyn ScanEngine> {
        let ruleset = CompiledRuleset::from_sources(&[(
            "ruleset0".to_string(),
            "[[rule]]\nname = \"MARKER\"\nstrings = [{ kind = \"text\", value = \"EVIL-MARKER-42\" }]\n"
                .to_string(),
        )])
        .unwrap();
        Arc::new(PatternMatch::from_ruleset(ruleset, Span::none()))
    }

    fn relay(
        dir: &Path,
        mode: OperatingMode,
        engines: Vec<Arc<dyn ScanEngine>>,
        delivery: Arc<dyn Delivery>,
    ) -> InspectionRelay {
        let storage = StorageLayout::create(dir).unwrap();
        InspectionRelay::new(mode, engines, storage, delivery, Span::none())
    }

    fn files_in(dir: &Path) -> Vec<std::path::PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }

    async fn run(relay: &InspectionRelay, raw: &str) -> Disposition {
        relay
            .handle(
                "192.0.2.10",
                "alice@example.com",
                vec!["bob@example.com".to_string()],
                raw.as_bytes().to_vec(),
            )
            .await
    }

    #[tokio::test]
    async fn test_decision_table() {
        // (block, always_block, malicious, delivered, quarantined)
        let table = [
            (false, false, false, true, false),
            (false, false, true, true, true),
            (true, false, false, true, false),
            (true, false, true, false, true),
            (false, true, false, false, false),
            (false, true, true, false, true),
            (true, true, false, false, false),
            (true, true, true, false, true),
        ];

        for (block, always_block, malicious, delivered, quarantined) in table {
            let temp_dir = TempDir::new().unwrap();
            let delivery = Arc::new(RecordingDelivery::default());
            let engine: Arc<dyn ScanEngine> = if malicious {
                Arc::new(FlagEverything)
            } else {
                Arc::new(AlwaysPass)
            };

            let relay = relay(
                temp_dir.path(),
                OperatingMode::new(block, always_block, false),
                vec![engine],
                delivery.clone(),
            );
            let disposition = run(&relay, ONE_ATTACHMENT).await;

            let case = format!(
                "block={} always_block={} malicious={}",
                block, always_block, malicious
            );
            assert_eq!(disposition.verdict.is_malicious(), malicious, "{}", case);
            assert_eq!(disposition.delivered, delivered, "{}", case);
            assert_eq!(delivery.count(), usize::from(delivered), "{}", case);
            assert_eq!(disposition.quarantine_path.is_some(), quarantined, "{}", case);
            assert_eq!(
                files_in(&temp_dir.path().join(QUARANTINE_DIR)).len(),
                usize::from(quarantined),
                "{}",
                case
            );
        }
    }

    #[tokio::test]
    async fn test_delivered_bytes_are_unmodified() {
        let temp_dir = TempDir::new().unwrap();
        let delivery = Arc::new(RecordingDelivery::default());
        let relay = relay(
            temp_dir.path(),
            OperatingMode::default(),
            vec![Arc::new(AlwaysPass)],
            delivery.clone(),
        );

        run(&relay, ONE_ATTACHMENT).await;

        let sent = delivery.sent.lock().unwrap();
        assert_eq!(sent[0].0, "alice@example.com");
        assert_eq!(sent[0].1, vec!["bob@example.com"]);
        assert_eq!(sent[0].2, ONE_ATTACHMENT.as_bytes());
    }

    #[tokio::test]
    async fn test_zero_attachments_is_clean() {
        let temp_dir = TempDir::new().unwrap();
        let delivery = Arc::new(RecordingDelivery::default());
        let relay = relay(
            temp_dir.path(),
            OperatingMode::new(true, false, false),
            vec![Arc::new(FlagEverything), Arc::new(PanickingEngine)],
            delivery.clone(),
        );

        let disposition = run(&relay, NO_ATTACHMENTS).await;

        assert!(!disposition.verdict.is_malicious());
        assert_eq!(disposition.attachment_count, 0);
        assert_eq!(delivery.count(), 1);
    }

    #[tokio::test]
    async fn test_engine_error_is_malicious() {
        let temp_dir = TempDir::new().unwrap();
        let delivery = Arc::new(RecordingDelivery::default());
        let relay = relay(
            temp_dir.path(),
            OperatingMode::new(true, false, false),
            vec![Arc::new(AlwaysPass), Arc::new(ErroringEngine)],
            delivery.clone(),
        );

        let disposition = run(&relay, ONE_ATTACHMENT).await;

        assert!(disposition.verdict.is_malicious());
        assert_eq!(disposition.verdict.fault_count(), 1);
        assert_eq!(disposition.verdict.findings[0].engine, "erroring");
        assert_eq!(delivery.count(), 0);
        assert!(disposition.quarantine_path.is_some());
    }

    #[tokio::test]
    async fn test_engine_panic_is_malicious() {
        let temp_dir = TempDir::new().unwrap();
        let delivery = Arc::new(RecordingDelivery::default());
        let relay = relay(
            temp_dir.path(),
            OperatingMode::new(true, false, false),
            vec![Arc::new(PanickingEngine), Arc::new(AlwaysPass)],
            delivery.clone(),
        );

        let disposition = run(&relay, ONE_ATTACHMENT).await;

        assert!(disposition.verdict.is_malicious());
        assert_eq!(
            disposition.verdict.findings[0].outcome,
            FindingOutcome::Faulted("corrupt state".to_string())
        );
        assert_eq!(delivery.count(), 0);

        // The relay keeps working after a panic
        let relay_clean = InspectionRelay::new(
            OperatingMode::new(true, false, false),
            vec![Arc::new(AlwaysPass)],
            relay.storage().clone(),
            delivery.clone(),
            Span::none(),
        );
        assert!(!run(&relay_clean, ONE_ATTACHMENT).await.verdict.is_malicious());
    }

    #[tokio::test]
    async fn test_every_engine_sees_every_attachment() {
        let temp_dir = TempDir::new().unwrap();
        let relay = relay(
            temp_dir.path(),
            OperatingMode::new(true, true, false),
            vec![Arc::new(FlagEverything), Arc::new(ErroringEngine)],
            Arc::new(RecordingDelivery::default()),
        );

        let disposition = run(&relay, TWO_ATTACHMENTS).await;

        assert_eq!(disposition.attachment_count, 2);
        assert_eq!(disposition.verdict.findings.len(), 4);
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_faulted_engine_is_not_logged_as_flagged() {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let attachments = vec![Attachment::new("report.pdf", b"%PDF".to_vec())];
        let engines: Vec<Arc<dyn ScanEngine>> = vec![Arc::new(ErroringEngine)];
        let verdict = tracing::subscriber::with_default(subscriber, || {
            scan_attachments(&engines, &attachments)
        });

        assert_eq!(verdict.fault_count(), 1);
        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("Engine failed"));
        assert!(!output.contains("Attachment flagged"));
    }

    #[test]
    fn test_matched_engine_is_logged_as_flagged() {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let attachments = vec![Attachment::new("report.pdf", b"%PDF".to_vec())];
        let engines: Vec<Arc<dyn ScanEngine>> = vec![Arc::new(FlagEverything)];
        tracing::subscriber::with_default(subscriber, || scan_attachments(&engines, &attachments));

        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("Attachment flagged"));
    }

    #[tokio::test]
    async fn test_end_to_end_block_quarantines_once() {
        let temp_dir = TempDir::new().unwrap();
        let delivery = Arc::new(RecordingDelivery::default());
        let relay = relay(
            temp_dir.path(),
            OperatingMode::new(true, false, false),
            vec![marker_engine()],
            delivery.clone(),
        );

        let disposition = run(&relay, TWO_ATTACHMENTS).await;

        assert!(disposition.verdict.is_malicious());
        assert_eq!(disposition.attachment_count, 2);
        assert_eq!(disposition.verdict.findings.len(), 1);
        assert_eq!(disposition.verdict.findings[0].attachment, "dropper.bin");
        assert_eq!(delivery.count(), 0);
        assert!(!disposition.delivered);

        let quarantined = files_in(&temp_dir.path().join(QUARANTINE_DIR));
        assert_eq!(quarantined.len(), 1);

        let content = std::fs::read_to_string(&quarantined[0]).unwrap();
        assert!(content.starts_with("MAILSIFT: Received message from : 192.0.2.10"));
        assert!(content.contains("nothing interesting here"));
        assert!(content.contains("header EVIL-MARKER-42 trailer"));

        assert!(files_in(&temp_dir.path().join(MESSAGES_DIR)).is_empty());
        assert!(files_in(&temp_dir.path().join(ATTACHMENTS_DIR)).is_empty());
    }

    #[tokio::test]
    async fn test_log_all_persists_every_message() {
        let temp_dir = TempDir::new().unwrap();
        let relay = relay(
            temp_dir.path(),
            OperatingMode::new(false, false, true),
            vec![Arc::new(AlwaysPass)],
            Arc::new(RecordingDelivery::default()),
        );

        run(&relay, NO_ATTACHMENTS).await;
        run(&relay, ONE_ATTACHMENT).await;

        assert_eq!(files_in(&temp_dir.path().join(MESSAGES_DIR)).len(), 2);
        assert!(files_in(&temp_dir.path().join(QUARANTINE_DIR)).is_empty());
    }

    #[tokio::test]
    async fn test_null_sender_is_persisted_with_placeholder() {
        let temp_dir = TempDir::new().unwrap();
        let relay = relay(
            temp_dir.path(),
            OperatingMode::new(false, true, true),
            vec![Arc::new(AlwaysPass)],
            Arc::new(RecordingDelivery::default()),
        );

        relay
            .handle(
                "192.0.2.10",
                "<>",
                vec!["bob@example.com".to_string()],
                NO_ATTACHMENTS.as_bytes().to_vec(),
            )
            .await;

        let logged = files_in(&temp_dir.path().join(MESSAGES_DIR));
        assert_eq!(logged.len(), 1);
        let name = logged[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("null-sender_"), "{}", name);
    }

    #[tokio::test]
    async fn test_save_attachments_regardless_of_verdict() {
        for malicious in [false, true] {
            let temp_dir = TempDir::new().unwrap();
            let engine: Arc<dyn ScanEngine> = if malicious {
                Arc::new(FlagEverything)
            } else {
                Arc::new(AlwaysPass)
            };
            let relay = relay(
                temp_dir.path(),
                OperatingMode::new(true, false, false),
                vec![engine],
                Arc::new(RecordingDelivery::default()),
            )
            .with_save_attachments(true);

            run(&relay, TWO_ATTACHMENTS).await;

            // content + sidecar per attachment
            assert_eq!(files_in(&temp_dir.path().join(ATTACHMENTS_DIR)).len(), 4);
        }
    }

    #[tokio::test]
    async fn test_delivery_failure_does_not_fail_pipeline() {
        let temp_dir = TempDir::new().unwrap();
        let relay = relay(
            temp_dir.path(),
            OperatingMode::default(),
            vec![Arc::new(FlagEverything)],
            Arc::new(FailingDelivery),
        );

        let disposition = run(&relay, ONE_ATTACHMENT).await;

        assert!(disposition.delivered);
        assert!(disposition.verdict.is_malicious());
        assert!(disposition.quarantine_path.is_some());
    }

    #[tokio::test]
    async fn test_quarantine_failure_keeps_verdict() {
        let temp_dir = TempDir::new().unwrap();
        let delivery = Arc::new(RecordingDelivery::default());
        let relay = relay(
            temp_dir.path(),
            OperatingMode::new(true, false, false),
            vec![Arc::new(FlagEverything)],
            delivery.clone(),
        );
        std::fs::remove_dir(temp_dir.path().join(QUARANTINE_DIR)).unwrap();

        let disposition = run(&relay, ONE_ATTACHMENT).await;

        assert!(disposition.verdict.is_malicious());
        assert!(disposition.quarantine_path.is_none());
        assert_eq!(delivery.count(), 0);
    }
}
