//! Core state machine implementation
//!
//! Drives one letter at a time through Listen, Repeat, Recognize, Write and
//! Completed. Every transition is gated by a validated learner input; the
//! only timed delays are the gaps that let spoken feedback finish before the
//! next instruction starts.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::config::{Config, Timing};
use crate::curriculum::{Curriculum, Letter};
use crate::drawing::{CommitTimer, DrawingSurface};
use crate::events::TutorEvent;
use crate::guidance::{targets, GuidanceCue, Layout};
use crate::verify::{HandwritingVerifier, Verdict, VerificationPolicy};
use crate::voice::{
    messages, Capability, PromptStep, Recognition, SpeechError, SpeechRecognizer,
    SpeechSynthesizer, VoicePrompter,
};

use super::session::{LearnerAction, LearningStage, Session};

/// Stage actions held back while the controller is waiting on speech or
/// verification
const MAX_DEFERRED: usize = 32;

/// External capabilities the controller drives
#[derive(Clone)]
pub struct Services {
    pub synth: Arc<dyn SpeechSynthesizer>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub verifier: Arc<dyn HandwritingVerifier>,
}

/// The state machine that sequences a lesson
pub struct StageController {
    curriculum: Curriculum,
    /// Current letter, stage and capture state
    session: Session,
    /// Time when the current stage was entered
    stage_entered_at: Option<Instant>,
    prompter: VoicePrompter,
    recognizer: Arc<dyn SpeechRecognizer>,
    recognition_locale: String,
    verifier: Arc<dyn HandwritingVerifier>,
    policy: VerificationPolicy,
    timing: Timing,
    surface: DrawingSurface,
    commit: CommitTimer,
    commit_rx: mpsc::Receiver<u64>,
    cue: GuidanceCue,
    layout: Layout,
    /// Capabilities the learner was already told are missing
    notified: HashSet<Capability>,
    rng: StdRng,
    /// Learner actions, taken out of `run` while a handler waits
    actions: Option<mpsc::Receiver<LearnerAction>>,
    /// Stage actions that arrived while a handler was waiting
    deferred: VecDeque<LearnerAction>,
    /// Channel for emitting tutor events
    event_tx: broadcast::Sender<TutorEvent>,
}

impl StageController {
    /// Create a controller positioned at the first letter's Listen stage
    pub fn new(
        curriculum: Curriculum,
        services: Services,
        config: &Config,
        event_tx: broadcast::Sender<TutorEvent>,
    ) -> Self {
        let (commit, commit_rx) = CommitTimer::new(config.timing.quiet_period);

        Self {
            curriculum,
            session: Session::default(),
            stage_entered_at: None,
            prompter: VoicePrompter::new(services.synth, config.voice.clone()),
            recognizer: services.recognizer,
            recognition_locale: config.voice.recognition_locale.clone(),
            verifier: services.verifier,
            policy: VerificationPolicy {
                fail_open: config.verification.fail_open,
            },
            timing: config.timing,
            surface: DrawingSurface::default(),
            commit,
            commit_rx,
            cue: GuidanceCue::new(config.timing.cue_duration, event_tx.clone()),
            layout: Layout::new(),
            notified: HashSet::new(),
            rng: StdRng::from_entropy(),
            actions: None,
            deferred: VecDeque::new(),
            event_tx,
        }
    }

    /// Current session state
    #[cfg(test)]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Get the current stage
    pub fn stage(&self) -> LearningStage {
        self.session.stage
    }

    pub fn letter_index(&self) -> usize {
        self.session.letter_index
    }

    fn letter(&self) -> Letter {
        self.curriculum.letter(self.session.letter_index)
    }

    /// Run the controller, processing learner actions and drawing commits
    pub async fn run(&mut self, action_rx: mpsc::Receiver<LearnerAction>) {
        info!(letters = self.curriculum.len(), "stage controller started");
        self.enter_stage(LearningStage::Listen);
        self.actions = Some(action_rx);

        loop {
            while let Some(action) = self.deferred.pop_front() {
                self.handle_action(action).await;
            }

            let Some(action_rx) = self.actions.as_mut() else {
                break;
            };
            tokio::select! {
                action = action_rx.recv() => match action {
                    Some(action) => self.handle_action(action).await,
                    None => break,
                },
                Some(generation) = self.commit_rx.recv() => {
                    self.handle_commit(generation).await;
                }
            }
        }

        self.commit.cancel();
        info!("stage controller stopped");
    }

    /// Dispatch a learner action against the current stage
    async fn handle_action(&mut self, action: LearnerAction) {
        let Some(action) = self.apply_input(action) else {
            return;
        };
        let stage = self.session.stage;

        match (stage, action) {
            // Page shown: the lesson page always opens on Listen for the
            // current letter, whatever stage it was left in
            (_, LearnerAction::Open) => self.begin_letter(false).await,

            (LearningStage::Listen, LearnerAction::PlayLetter) => self.play_letter().await,

            (LearningStage::Repeat, LearnerAction::StartCapture) => self.capture().await,

            (LearningStage::Recognize, LearnerAction::SelectGlyph { glyph }) => {
                self.select_glyph(glyph).await
            }

            (LearningStage::Completed, LearnerAction::ResetLetter) => {
                self.begin_letter(true).await
            }
            (LearningStage::Completed, LearnerAction::Advance) => {
                if self.curriculum.has_next(self.session.letter_index) {
                    self.session.letter_index += 1;
                    self.begin_letter(true).await;
                } else {
                    debug!(
                        letter_index = self.session.letter_index,
                        "no next letter, advance ignored"
                    );
                }
            }

            (stage, action) => {
                debug!(?action, %stage, "action not valid in this stage, ignored");
            }
        }
    }

    /// Apply input that never waits: layout and drawing
    ///
    /// Returns the action when it has to go through a stage handler.
    fn apply_input(&mut self, action: LearnerAction) -> Option<LearnerAction> {
        let stage = self.session.stage;
        debug!(?action, %stage, "learner action");

        match (stage, action) {
            (_, LearnerAction::Layout { regions }) => {
                self.layout = regions;
            }

            (LearningStage::Write, LearnerAction::PenDown { x, y }) => {
                self.commit.cancel();
                self.surface.pen_down(x, y);
            }
            (LearningStage::Write, LearnerAction::PenMove { x, y }) => {
                self.surface.pen_move(x, y);
            }
            (LearningStage::Write, LearnerAction::PenUp) => {
                self.surface.pen_up();
                if !self.surface.is_blank() {
                    self.commit.arm();
                }
            }
            (LearningStage::Write, LearnerAction::ClearCanvas) => self.reset_drawing(),

            (
                stage,
                action @ (LearnerAction::PenDown { .. }
                | LearnerAction::PenMove { .. }
                | LearnerAction::PenUp
                | LearnerAction::ClearCanvas),
            ) => {
                debug!(?action, %stage, "drawing input outside Write, ignored");
            }

            (_, action) => return Some(action),
        }
        None
    }

    /// Await `work` while still taking learner input
    ///
    /// Drawing and layout input is applied immediately. Stage actions are
    /// deferred until the current handler finishes, so prompts never overlap.
    async fn while_busy<T>(&mut self, work: impl Future<Output = T>) -> T {
        let Some(mut action_rx) = self.actions.take() else {
            return work.await;
        };
        tokio::pin!(work);

        let output = loop {
            tokio::select! {
                biased;
                output = &mut work => break output,
                Some(action) = action_rx.recv() => self.defer(action),
            }
        };

        self.actions = Some(action_rx);
        output
    }

    fn defer(&mut self, action: LearnerAction) {
        let Some(action) = self.apply_input(action) else {
            return;
        };
        if matches!(action, LearnerAction::StartCapture) && self.session.capturing {
            debug!("capture already in progress");
        } else if self.deferred.len() >= MAX_DEFERRED {
            warn!(?action, "too many pending actions, dropped");
        } else {
            self.deferred.push_back(action);
        }
    }

    /// Enter Listen for the current letter and play its introduction
    async fn begin_letter(&mut self, restarting: bool) {
        self.reset_drawing();
        self.enter_stage(LearningStage::Listen);

        if restarting {
            self.while_busy(tokio::time::sleep(self.timing.restart_delay))
                .await;
        }

        let letter = self.letter();
        let steps = [
            PromptStep::Say(messages::introduce(letter.name)),
            PromptStep::Pause(self.timing.prompt_gap),
            PromptStep::Say(messages::PRESS_LISTEN.into()),
        ];
        if self.prompt(&steps).await {
            self.cue.show(targets::LISTEN_CONTROL, &self.layout);
        }
    }

    /// Listen: play the reference sound, then move on to Repeat
    async fn play_letter(&mut self) {
        let glyph = self.letter().glyph;
        let steps = [
            PromptStep::Pronounce(glyph),
            PromptStep::Pause(self.timing.prompt_gap),
        ];
        if !self.prompt(&steps).await {
            return;
        }

        self.enter_stage(LearningStage::Repeat);
        if self.prompt(&[PromptStep::Say(messages::SAY_LETTER.into())]).await {
            self.cue.show(targets::MICROPHONE, &self.layout);
        }
    }

    /// Repeat: capture one utterance and validate it
    async fn capture(&mut self) {
        if self.session.capturing {
            debug!("capture already in progress");
            return;
        }

        self.session.capturing = true;
        self.session.transcript = None;
        self.emit(TutorEvent::CaptureStarted);

        let recognizer = Arc::clone(&self.recognizer);
        let locale = self.recognition_locale.clone();
        let outcome = self.while_busy(recognizer.recognize(&locale)).await;

        self.session.capturing = false;
        self.emit(TutorEvent::CaptureStopped);

        match outcome {
            Ok(Recognition::Transcript(transcript)) => {
                let matched = self.letter().matches_transcript(&transcript);
                info!(%transcript, matched, "transcript captured");
                self.emit(TutorEvent::TranscriptCaptured {
                    transcript: transcript.clone(),
                    matched,
                });
                self.session.transcript = Some(transcript);

                if matched {
                    self.pronounced().await;
                } else {
                    self.prompt(&[PromptStep::Say(messages::TRY_AGAIN.into())])
                        .await;
                }
            }
            Ok(Recognition::NoMatch) => {
                debug!("nothing recognized");
                self.prompt(&[PromptStep::Say(messages::TRY_AGAIN.into())])
                    .await;
            }
            Err(SpeechError::Unavailable) => self.notify_unavailable(Capability::SpeechRecognition),
            Err(SpeechError::Cancelled) => debug!("capture cancelled"),
            Err(SpeechError::Failed(reason)) => {
                warn!(%reason, "speech recognition failed");
                self.prompt(&[PromptStep::Say(messages::TRY_AGAIN.into())])
                    .await;
            }
        }
    }

    async fn pronounced(&mut self) {
        if !self
            .prompt(&[PromptStep::Say(messages::PRONUNCIATION_CORRECT.into())])
            .await
        {
            return;
        }

        self.enter_stage(LearningStage::Recognize);
        let options = self
            .curriculum
            .choices(self.session.letter_index, &mut self.rng);
        self.session.choices = options.clone();
        self.emit(TutorEvent::ChoicesPresented { options });

        let steps = [
            PromptStep::Pause(self.timing.prompt_gap),
            PromptStep::Say(messages::FIND_LETTER.into()),
        ];
        if self.prompt(&steps).await {
            self.cue.show(targets::CHOICE_GRID, &self.layout);
        }
    }

    /// Recognize: check the picked glyph
    async fn select_glyph(&mut self, glyph: char) {
        let expected = self.letter().glyph;
        if glyph != expected {
            info!(%glyph, %expected, "wrong glyph picked");
            self.prompt(&[PromptStep::Say(messages::WRONG_CHOICE.into())])
                .await;
            return;
        }

        if !self
            .prompt(&[PromptStep::Say(messages::RECOGNIZED.into())])
            .await
        {
            return;
        }

        self.enter_stage(LearningStage::Write);
        let steps = [
            PromptStep::Pause(self.timing.prompt_gap),
            PromptStep::Say(messages::WRITE_LETTER.into()),
        ];
        if self.prompt(&steps).await {
            self.cue.show(targets::CANVAS, &self.layout);
        }
    }

    /// Write: the quiet period elapsed, submit the drawing
    async fn handle_commit(&mut self, generation: u64) {
        if !self.commit.accept(generation) {
            return;
        }
        if self.session.stage != LearningStage::Write || self.surface.is_blank() {
            debug!("nothing to verify");
            return;
        }

        let png = match self.surface.to_png() {
            Ok(png) => png,
            Err(e) => {
                error!(?e, "failed to rasterize drawing");
                return;
            }
        };

        let glyph = self.letter().glyph;
        self.emit(TutorEvent::VerificationRequested { glyph });
        let verifier = Arc::clone(&self.verifier);
        let outcome = self.while_busy(verifier.verify(glyph, png)).await;
        let verdict = self.policy.resolve(outcome);

        info!(%glyph, ?verdict, "drawing verified");
        self.emit(TutorEvent::VerificationSettled { verdict });

        match verdict {
            Verdict::Accepted => self.written().await,
            Verdict::Rejected => {
                self.prompt(&[PromptStep::Say(messages::WRITTEN_WRONG.into())])
                    .await;
            }
        }
    }

    async fn written(&mut self) {
        let steps = [
            PromptStep::Pause(self.timing.prompt_gap),
            PromptStep::Say(messages::WRITTEN_WELL.into()),
        ];
        if !self.prompt(&steps).await {
            return;
        }

        self.enter_stage(LearningStage::Completed);
        let steps = [
            PromptStep::Pause(self.timing.prompt_gap),
            PromptStep::Say(messages::LETTER_COMPLETE.into()),
        ];
        if self.prompt(&steps).await && self.curriculum.has_next(self.session.letter_index) {
            self.cue.show(targets::NEXT_CONTROL, &self.layout);
        }
    }

    /// Play a prompt sequence; false if it did not finish
    async fn prompt(&mut self, steps: &[PromptStep]) -> bool {
        let prompter = self.prompter.clone();
        match self.while_busy(prompter.play(steps)).await {
            Ok(()) => true,
            Err(SpeechError::Unavailable) => {
                self.notify_unavailable(Capability::SpeechSynthesis);
                false
            }
            Err(e) => {
                debug!(?e, "prompt sequence did not finish");
                false
            }
        }
    }

    /// Tell the learner once that a capability is missing
    fn notify_unavailable(&mut self, capability: Capability) {
        if self.notified.insert(capability) {
            warn!(?capability, "speech capability unavailable");
            self.emit(TutorEvent::CapabilityUnavailable { capability });
        }
    }

    /// Wipe the drawing and drop any pending commit
    fn reset_drawing(&mut self) {
        self.commit.cancel();
        if !self.surface.is_blank() || self.surface.is_pen_down() {
            self.surface.clear();
        }
        self.emit(TutorEvent::CanvasCleared);
    }

    /// Perform a stage transition
    fn enter_stage(&mut self, new_stage: LearningStage) {
        let old_stage = self.session.stage;
        let duration_ms = self
            .stage_entered_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        let letter = self.letter();

        info!(
            from = %old_stage,
            to = %new_stage,
            letter_index = self.session.letter_index,
            glyph = %letter.glyph,
            sound = letter.sound,
            duration_ms = duration_ms,
            "stage transition"
        );

        if old_stage == LearningStage::Write || new_stage == LearningStage::Write {
            self.reset_drawing();
        }
        if new_stage != LearningStage::Recognize {
            self.session.choices.clear();
        }

        self.session.stage = new_stage;
        self.stage_entered_at = Some(Instant::now());

        self.emit(TutorEvent::StageEntered {
            letter_index: self.session.letter_index,
            glyph: letter.glyph,
            stage: new_stage,
        });
    }

    fn emit(&self, event: TutorEvent) {
        debug!(%event, "emitting event");
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::curriculum::ARABIC_ALPHABET;
    use crate::guidance::Rect;
    use crate::verify::{Judgment, MockHandwritingVerifier, VerifyError};
    use crate::voice::testing::RecordingSynth;
    use crate::voice::MockSpeechRecognizer;

    struct Harness {
        actions: mpsc::Sender<LearnerAction>,
        events: broadcast::Receiver<TutorEvent>,
        synth: RecordingSynth,
        handle: JoinHandle<StageController>,
    }

    impl Harness {
        fn start(
            letter_index: usize,
            recognizer: impl SpeechRecognizer + 'static,
            verifier: impl HandwritingVerifier + 'static,
        ) -> Self {
            Self::start_with(letter_index, recognizer, verifier, |_| {})
        }

        fn start_with(
            letter_index: usize,
            recognizer: impl SpeechRecognizer + 'static,
            verifier: impl HandwritingVerifier + 'static,
            tweak: impl FnOnce(&mut Config),
        ) -> Self {
            let (event_tx, events) = broadcast::channel(512);
            let synth = RecordingSynth::with_events(event_tx.clone());
            let mut config = Config::with_data_dir("/tmp/letter-tutor-test".into());
            tweak(&mut config);

            let mut controller = StageController::new(
                Curriculum::arabic(),
                Services {
                    synth: Arc::new(synth.clone()),
                    recognizer: Arc::new(recognizer),
                    verifier: Arc::new(verifier),
                },
                &config,
                event_tx,
            );
            controller.session.letter_index = letter_index;
            controller.rng = StdRng::seed_from_u64(42);

            // Same depth as the daemon's action queue
            let (actions, action_rx) = mpsc::channel(32);
            let handle = tokio::spawn(async move {
                controller.run(action_rx).await;
                controller
            });

            Self {
                actions,
                events,
                synth,
                handle,
            }
        }

        async fn send(&self, action: LearnerAction) {
            self.actions.send(action).await.unwrap();
        }

        /// Receive events up to and including the first matching `pred`
        async fn collect_until(&mut self, pred: impl Fn(&TutorEvent) -> bool) -> Vec<TutorEvent> {
            let mut seen = Vec::new();
            loop {
                let event = self.events.recv().await.unwrap();
                let done = pred(&event);
                seen.push(event);
                if done {
                    return seen;
                }
            }
        }

        async fn wait_for(&mut self, pred: impl Fn(&TutorEvent) -> bool) {
            self.collect_until(pred).await;
        }

        async fn wait_for_cue(&mut self, target: &str) {
            self.wait_for(|e| matches!(e, TutorEvent::CueShown { target: t, .. } if t == target))
                .await;
        }

        async fn wait_for_speech(&mut self, text: &str) {
            self.wait_for(
                |e| matches!(e, TutorEvent::SpeakRequested { text: t, .. } if t == text),
            )
            .await;
        }

        /// Close the action channel and hand back the controller plus any
        /// events not consumed yet
        async fn finish(self) -> (StageController, Vec<TutorEvent>) {
            let Self {
                actions,
                mut events,
                handle,
                ..
            } = self;
            drop(actions);
            let controller = handle.await.unwrap();
            let rest = std::iter::from_fn(|| events.try_recv().ok()).collect();
            (controller, rest)
        }
    }

    fn full_layout() -> Layout {
        [
            targets::LISTEN_CONTROL,
            targets::MICROPHONE,
            targets::CHOICE_GRID,
            targets::CANVAS,
            targets::NEXT_CONTROL,
        ]
        .iter()
        .enumerate()
        .map(|(i, target)| {
            (
                target.to_string(),
                Rect {
                    x: 0.0,
                    y: i as f32 * 100.0,
                    width: 200.0,
                    height: 50.0,
                },
            )
        })
        .collect()
    }

    fn hears(transcript: &'static str) -> MockSpeechRecognizer {
        let mut recognizer = MockSpeechRecognizer::new();
        recognizer
            .expect_recognize()
            .returning(move |_| Ok(Recognition::Transcript(transcript.to_string())));
        recognizer
    }

    fn recognizer_failing(error: SpeechError) -> MockSpeechRecognizer {
        let mut recognizer = MockSpeechRecognizer::new();
        recognizer
            .expect_recognize()
            .returning(move |_| Err(error.clone()));
        recognizer
    }

    fn judges(is_match: bool) -> MockHandwritingVerifier {
        let mut verifier = MockHandwritingVerifier::new();
        verifier
            .expect_verify()
            .times(1)
            .returning(move |_, _| Ok(Judgment { is_match }));
        verifier
    }

    fn never_verifies() -> MockHandwritingVerifier {
        let mut verifier = MockHandwritingVerifier::new();
        verifier.expect_verify().never();
        verifier
    }

    fn stage_entered(stage: LearningStage) -> impl Fn(&TutorEvent) -> bool {
        move |e| matches!(e, TutorEvent::StageEntered { stage: s, .. } if *s == stage)
    }

    /// Open the lesson and drive it to the Write stage
    async fn reach_write(h: &mut Harness, letter_index: usize) {
        let letter = ARABIC_ALPHABET[letter_index];
        h.send(LearnerAction::Layout {
            regions: full_layout(),
        })
        .await;
        h.send(LearnerAction::Open).await;
        h.wait_for_cue(targets::LISTEN_CONTROL).await;

        h.send(LearnerAction::PlayLetter).await;
        h.wait_for_cue(targets::MICROPHONE).await;

        h.send(LearnerAction::StartCapture).await;
        h.wait_for_cue(targets::CHOICE_GRID).await;

        h.send(LearnerAction::SelectGlyph {
            glyph: letter.glyph,
        })
        .await;
        h.wait_for_cue(targets::CANVAS).await;
    }

    /// Drive the lesson through Write into Completed
    async fn reach_completed(h: &mut Harness, letter_index: usize) {
        reach_write(h, letter_index).await;
        draw_stroke(h).await;
        h.wait_for_speech(messages::LETTER_COMPLETE).await;
    }

    async fn draw_stroke(h: &Harness) {
        h.send(LearnerAction::PenDown { x: 100.0, y: 100.0 }).await;
        h.send(LearnerAction::PenMove { x: 150.0, y: 180.0 }).await;
        h.send(LearnerAction::PenUp).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_state() {
        let h = Harness::start(0, MockSpeechRecognizer::new(), never_verifies());
        let (controller, events) = h.finish().await;

        assert_eq!(controller.stage(), LearningStage::Listen);
        assert_eq!(controller.letter_index(), 0);
        assert!(events.iter().any(stage_entered(LearningStage::Listen)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_listen_cue_follows_both_prompts_for_every_letter() {
        for (index, letter) in ARABIC_ALPHABET.iter().enumerate() {
            let mut h = Harness::start(index, MockSpeechRecognizer::new(), never_verifies());
            h.send(LearnerAction::Layout {
                regions: full_layout(),
            })
            .await;
            h.send(LearnerAction::Open).await;

            let seen = h
                .collect_until(|e| matches!(e, TutorEvent::CueShown { .. }))
                .await;
            let spoken: Vec<&str> = seen
                .iter()
                .filter_map(|e| match e {
                    TutorEvent::SpeakRequested { text, .. } => Some(text.as_str()),
                    _ => None,
                })
                .collect();

            assert_eq!(
                spoken,
                vec![messages::introduce(letter.name).as_str(), messages::PRESS_LISTEN],
                "letter {index}"
            );
            assert!(matches!(
                seen.last(),
                Some(TutorEvent::CueShown { target, .. }) if target == targets::LISTEN_CONTROL
            ));

            let (controller, _) = h.finish().await;
            assert_eq!(controller.stage(), LearningStage::Listen);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_listen_to_repeat_after_playback() {
        let mut h = Harness::start(2, MockSpeechRecognizer::new(), never_verifies());
        let synth = h.synth.clone();
        h.send(LearnerAction::Layout {
            regions: full_layout(),
        })
        .await;
        h.send(LearnerAction::PlayLetter).await;
        h.wait_for_cue(targets::MICROPHONE).await;

        let spoken = synth.spoken.lock().unwrap().clone();
        assert_eq!(spoken[0].text, "ت");
        assert_eq!(spoken[0].locale, "ar-SA");
        assert_eq!(spoken[0].rate, 0.7);
        assert_eq!(spoken[1].text, messages::SAY_LETTER);
        assert_eq!(spoken[1].locale, "ar-MA");

        let (controller, _) = h.finish().await;
        assert_eq!(controller.stage(), LearningStage::Repeat);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transcript_with_filler_words_accepted() {
        let mut h = Harness::start(1, hears("قال باء اليوم"), never_verifies());
        h.send(LearnerAction::PlayLetter).await;
        h.wait_for(stage_entered(LearningStage::Repeat)).await;

        h.send(LearnerAction::StartCapture).await;
        h.wait_for(|e| {
            matches!(e, TutorEvent::TranscriptCaptured { matched: true, .. })
        })
        .await;
        h.wait_for(stage_entered(LearningStage::Recognize)).await;
        h.wait_for_speech(messages::FIND_LETTER).await;

        let (controller, _) = h.finish().await;
        let session = controller.session();
        assert_eq!(session.stage, LearningStage::Recognize);
        assert_eq!(session.transcript.as_deref(), Some("قال باء اليوم"));
        assert!(!session.capturing);
        assert_eq!(session.choices.len(), 4);
        assert!(session.choices.contains(&'ب'));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transcript_mismatch_stays_in_repeat() {
        let mut h = Harness::start(1, hears("تاء"), never_verifies());
        h.send(LearnerAction::PlayLetter).await;
        h.wait_for(stage_entered(LearningStage::Repeat)).await;

        h.send(LearnerAction::StartCapture).await;
        h.wait_for(|e| {
            matches!(e, TutorEvent::TranscriptCaptured { matched: false, .. })
        })
        .await;
        h.wait_for_speech(messages::TRY_AGAIN).await;

        let (controller, _) = h.finish().await;
        assert_eq!(controller.stage(), LearningStage::Repeat);
        assert_eq!(controller.session().transcript.as_deref(), Some("تاء"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_match_reprompts() {
        let mut recognizer = MockSpeechRecognizer::new();
        recognizer
            .expect_recognize()
            .times(1)
            .returning(|_| Ok(Recognition::NoMatch));

        let mut h = Harness::start(0, recognizer, never_verifies());
        h.send(LearnerAction::PlayLetter).await;
        h.send(LearnerAction::StartCapture).await;
        h.wait_for_speech(messages::TRY_AGAIN).await;

        let (controller, _) = h.finish().await;
        assert_eq!(controller.stage(), LearningStage::Repeat);
        assert!(controller.session().transcript.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recognition_unavailable_notified_once() {
        let mut h = Harness::start(
            0,
            recognizer_failing(SpeechError::Unavailable),
            never_verifies(),
        );
        h.send(LearnerAction::PlayLetter).await;
        h.wait_for(stage_entered(LearningStage::Repeat)).await;

        h.send(LearnerAction::StartCapture).await;
        h.send(LearnerAction::StartCapture).await;

        let (controller, events) = h.finish().await;
        let captures = events
            .iter()
            .filter(|e| matches!(e, TutorEvent::CaptureStopped))
            .count();
        let notices = events
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    TutorEvent::CapabilityUnavailable {
                        capability: Capability::SpeechRecognition
                    }
                )
            })
            .count();
        assert_eq!(captures, 2);
        assert_eq!(notices, 1);
        assert_eq!(controller.stage(), LearningStage::Repeat);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_glyph_stays_then_correct_glyph_writes() {
        let mut h = Harness::start(0, hears("الف"), never_verifies());
        h.send(LearnerAction::PlayLetter).await;
        h.send(LearnerAction::StartCapture).await;
        h.wait_for_speech(messages::FIND_LETTER).await;

        h.send(LearnerAction::SelectGlyph { glyph: 'ب' }).await;
        let seen = h
            .collect_until(|e| {
                matches!(e, TutorEvent::SpeakRequested { text, .. } if text == messages::WRONG_CHOICE)
            })
            .await;
        assert!(!seen.iter().any(stage_entered(LearningStage::Write)));

        h.send(LearnerAction::SelectGlyph { glyph: 'أ' }).await;
        h.wait_for(stage_entered(LearningStage::Write)).await;
        h.wait_for_speech(messages::WRITE_LETTER).await;

        let (controller, _) = h.finish().await;
        assert_eq!(controller.stage(), LearningStage::Write);
        assert!(controller.session().choices.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_before_quiet_period_prevents_verification() {
        let mut h = Harness::start(0, hears("الف"), never_verifies());
        reach_write(&mut h, 0).await;

        draw_stroke(&h).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.send(LearnerAction::ClearCanvas).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let (controller, events) = h.finish().await;
        assert_eq!(controller.stage(), LearningStage::Write);
        assert!(controller.surface.is_blank());
        assert!(events.contains(&TutorEvent::CanvasCleared));
        assert!(!events
            .iter()
            .any(|e| matches!(e, TutorEvent::VerificationRequested { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_stroke_restarts_quiet_period() {
        let mut h = Harness::start(0, hears("الف"), judges(true));
        reach_write(&mut h, 0).await;
        let started = tokio::time::Instant::now();

        draw_stroke(&h).await;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        draw_stroke(&h).await;

        h.wait_for(|e| matches!(e, TutorEvent::VerificationRequested { .. }))
            .await;
        assert!(started.elapsed() >= Duration::from_millis(3500));

        h.wait_for(stage_entered(LearningStage::Completed)).await;
        let (controller, _) = h.finish().await;
        assert_eq!(controller.stage(), LearningStage::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_positive_match_completes() {
        let mut verifier = MockHandwritingVerifier::new();
        verifier
            .expect_verify()
            .withf(|glyph, png| *glyph == 'أ' && png.starts_with(b"\x89PNG"))
            .times(1)
            .returning(|_, _| Ok(Judgment { is_match: true }));

        let mut h = Harness::start(0, hears("الف"), verifier);
        reach_write(&mut h, 0).await;
        draw_stroke(&h).await;

        h.wait_for(|e| {
            matches!(
                e,
                TutorEvent::VerificationSettled {
                    verdict: Verdict::Accepted
                }
            )
        })
        .await;
        h.wait_for_speech(messages::WRITTEN_WELL).await;
        h.wait_for(stage_entered(LearningStage::Completed)).await;
        h.wait_for_cue(targets::NEXT_CONTROL).await;

        let (controller, _) = h.finish().await;
        assert_eq!(controller.stage(), LearningStage::Completed);
        assert!(controller.surface.is_blank());
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_error_fails_open() {
        let mut verifier = MockHandwritingVerifier::new();
        verifier
            .expect_verify()
            .times(1)
            .returning(|_, _| Err(VerifyError::Status(503)));

        let mut h = Harness::start(0, hears("الف"), verifier);
        reach_write(&mut h, 0).await;
        draw_stroke(&h).await;

        h.wait_for(|e| {
            matches!(
                e,
                TutorEvent::VerificationSettled {
                    verdict: Verdict::Accepted
                }
            )
        })
        .await;
        h.wait_for(stage_entered(LearningStage::Completed)).await;

        let (controller, _) = h.finish().await;
        assert_eq!(controller.stage(), LearningStage::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_error_rejected_when_fail_closed() {
        let mut verifier = MockHandwritingVerifier::new();
        verifier
            .expect_verify()
            .times(1)
            .returning(|_, _| Err(VerifyError::Status(502)));

        let mut h = Harness::start_with(0, hears("الف"), verifier, |config| {
            config.verification.fail_open = false;
        });
        reach_write(&mut h, 0).await;
        draw_stroke(&h).await;
        h.wait_for_speech(messages::WRITTEN_WRONG).await;

        let (controller, _) = h.finish().await;
        assert_eq!(controller.stage(), LearningStage::Write);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatch_stays_in_write() {
        let mut h = Harness::start(0, hears("الف"), judges(false));
        reach_write(&mut h, 0).await;
        draw_stroke(&h).await;

        h.wait_for(|e| {
            matches!(
                e,
                TutorEvent::VerificationSettled {
                    verdict: Verdict::Rejected
                }
            )
        })
        .await;
        h.wait_for_speech(messages::WRITTEN_WRONG).await;

        let (controller, _) = h.finish().await;
        assert_eq!(controller.stage(), LearningStage::Write);
        assert!(!controller.surface.is_blank());
    }

    #[tokio::test(start_paused = true)]
    async fn test_advance_past_last_letter_is_noop() {
        let last = ARABIC_ALPHABET.len() - 1;
        let mut h = Harness::start(last, hears("ياء"), judges(true));
        reach_completed(&mut h, last).await;

        h.send(LearnerAction::Advance).await;

        let (controller, events) = h.finish().await;
        assert_eq!(controller.stage(), LearningStage::Completed);
        assert_eq!(controller.letter_index(), last);
        assert!(!events
            .iter()
            .any(|e| matches!(e, TutorEvent::StageEntered { .. })));
        assert!(!events.iter().any(|e| {
            matches!(e, TutorEvent::CueShown { target, .. } if target == targets::NEXT_CONTROL)
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_advance_moves_to_next_letter() {
        let mut h = Harness::start(0, hears("الف"), judges(true));
        reach_completed(&mut h, 0).await;

        h.send(LearnerAction::Advance).await;
        h.wait_for(|e| {
            matches!(
                e,
                TutorEvent::StageEntered {
                    letter_index: 1,
                    glyph: 'ب',
                    stage: LearningStage::Listen,
                }
            )
        })
        .await;
        h.wait_for_cue(targets::LISTEN_CONTROL).await;

        let texts = h.synth.texts();
        let (controller, _) = h.finish().await;
        assert_eq!(controller.stage(), LearningStage::Listen);
        assert_eq!(controller.letter_index(), 1);
        assert!(texts.contains(&messages::introduce("باء")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_returns_to_listen_with_clear_canvas() {
        let mut h = Harness::start(0, hears("الف"), judges(true));
        reach_completed(&mut h, 0).await;

        h.send(LearnerAction::ResetLetter).await;
        let seen = h.collect_until(stage_entered(LearningStage::Listen)).await;
        assert!(seen.contains(&TutorEvent::CanvasCleared));
        h.wait_for_cue(targets::LISTEN_CONTROL).await;

        let (controller, _) = h.finish().await;
        assert_eq!(controller.stage(), LearningStage::Listen);
        assert_eq!(controller.letter_index(), 0);
        assert!(controller.surface.is_blank());
        assert!(!controller.commit.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_actions_outside_their_stage_are_ignored() {
        let h = Harness::start(0, MockSpeechRecognizer::new(), never_verifies());
        h.send(LearnerAction::StartCapture).await;
        h.send(LearnerAction::SelectGlyph { glyph: 'أ' }).await;
        h.send(LearnerAction::PenDown { x: 10.0, y: 10.0 }).await;
        h.send(LearnerAction::PenMove { x: 90.0, y: 90.0 }).await;
        h.send(LearnerAction::PenUp).await;
        h.send(LearnerAction::ResetLetter).await;
        h.send(LearnerAction::Advance).await;

        let (controller, events) = h.finish().await;
        assert_eq!(controller.stage(), LearningStage::Listen);
        assert_eq!(controller.letter_index(), 0);
        assert!(controller.surface.is_blank());
        assert!(!events
            .iter()
            .any(|e| matches!(e, TutorEvent::CaptureStarted)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthesis_unavailable_blocks_progression() {
        let h = Harness::start(0, MockSpeechRecognizer::new(), never_verifies());
        *h.synth.fail_with.lock().unwrap() = Some(SpeechError::Unavailable);

        h.send(LearnerAction::Open).await;
        h.send(LearnerAction::PlayLetter).await;
        h.send(LearnerAction::PlayLetter).await;

        let (controller, mut events) = h.finish().await;
        events.retain(|e| matches!(e, TutorEvent::CapabilityUnavailable { .. }));
        assert_eq!(
            events,
            vec![TutorEvent::CapabilityUnavailable {
                capability: Capability::SpeechSynthesis
            }]
        );
        assert_eq!(controller.stage(), LearningStage::Listen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_prompt_skips_cue() {
        let h = Harness::start(0, MockSpeechRecognizer::new(), never_verifies());
        *h.synth.fail_with.lock().unwrap() = Some(SpeechError::Cancelled);
        h.send(LearnerAction::Layout {
            regions: full_layout(),
        })
        .await;
        h.send(LearnerAction::Open).await;

        let (controller, events) = h.finish().await;
        assert!(!events
            .iter()
            .any(|e| matches!(e, TutorEvent::CueShown { .. })));
        assert!(!events
            .iter()
            .any(|e| matches!(e, TutorEvent::CapabilityUnavailable { .. })));
        assert_eq!(controller.stage(), LearningStage::Listen);
    }

    /// Takes five seconds per drawing; rejects the first, accepts the rest
    struct SlowVerifier {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl HandwritingVerifier for SlowVerifier {
        async fn verify(&self, _glyph: char, _png: Vec<u8>) -> Result<Judgment, VerifyError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Judgment { is_match: call > 0 })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_drawing_continues_during_slow_verification() {
        let calls = Arc::new(AtomicUsize::new(0));
        let verifier = SlowVerifier {
            calls: Arc::clone(&calls),
        };
        let mut h = Harness::start(0, hears("الف"), verifier);
        reach_write(&mut h, 0).await;
        draw_stroke(&h).await;
        h.wait_for(|e| matches!(e, TutorEvent::VerificationRequested { .. }))
            .await;

        // More input than the action queue holds, spread over the wait
        h.actions
            .try_send(LearnerAction::PenDown { x: 20.0, y: 20.0 })
            .unwrap();
        for i in 0..60 {
            tokio::time::sleep(Duration::from_millis(16)).await;
            let step = i as f32 * 4.0;
            h.actions
                .try_send(LearnerAction::PenMove {
                    x: 20.0 + step,
                    y: 20.0 + step,
                })
                .unwrap();
        }
        h.actions.try_send(LearnerAction::PenUp).unwrap();

        h.wait_for(|e| {
            matches!(
                e,
                TutorEvent::VerificationSettled {
                    verdict: Verdict::Rejected
                }
            )
        })
        .await;
        h.wait_for(|e| matches!(e, TutorEvent::VerificationRequested { .. }))
            .await;
        h.wait_for(stage_entered(LearningStage::Completed)).await;

        let (controller, _) = h.finish().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(controller.stage(), LearningStage::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_action_during_prompt_runs_afterwards() {
        let mut h = Harness::start(0, MockSpeechRecognizer::new(), never_verifies());
        h.send(LearnerAction::Layout {
            regions: full_layout(),
        })
        .await;
        h.send(LearnerAction::Open).await;
        h.send(LearnerAction::PlayLetter).await;

        let seen = h.collect_until(stage_entered(LearningStage::Repeat)).await;
        let cue = seen.iter().position(|e| {
            matches!(e, TutorEvent::CueShown { target, .. } if target == targets::LISTEN_CONTROL)
        });
        assert!(cue.is_some(), "listen prompts finish before playback");

        h.wait_for_cue(targets::MICROPHONE).await;
        let texts = h.synth.texts();
        assert_eq!(texts[1], messages::PRESS_LISTEN);
        assert_eq!(texts[2], "أ");
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_capture_while_capturing_ignored() {
        let mut recognizer = MockSpeechRecognizer::new();
        recognizer
            .expect_recognize()
            .times(1)
            .returning(|_| Ok(Recognition::NoMatch));
        let calls = Arc::new(AtomicUsize::new(0));
        let slow = SlowRecognizer {
            inner: recognizer,
            calls: Arc::clone(&calls),
        };

        let mut h = Harness::start(0, slow, never_verifies());
        h.send(LearnerAction::PlayLetter).await;
        h.wait_for(stage_entered(LearningStage::Repeat)).await;

        h.send(LearnerAction::StartCapture).await;
        h.wait_for(|e| matches!(e, TutorEvent::CaptureStarted)).await;
        h.send(LearnerAction::StartCapture).await;
        h.wait_for_speech(messages::TRY_AGAIN).await;

        let (controller, _) = h.finish().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(controller.stage(), LearningStage::Repeat);
    }

    /// Waits two seconds before delegating to `inner`
    struct SlowRecognizer {
        inner: MockSpeechRecognizer,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SpeechRecognizer for SlowRecognizer {
        async fn recognize(&self, locale: &str) -> Result<Recognition, SpeechError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(2)).await;
            self.inner.recognize(locale).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_from_write_restarts_letter() {
        let mut h = Harness::start(0, hears("الف"), never_verifies());
        reach_write(&mut h, 0).await;
        h.send(LearnerAction::PenDown { x: 100.0, y: 100.0 }).await;
        h.send(LearnerAction::PenMove { x: 150.0, y: 180.0 }).await;

        h.send(LearnerAction::Open).await;
        h.wait_for(stage_entered(LearningStage::Listen)).await;
        h.wait_for_cue(targets::LISTEN_CONTROL).await;

        let (controller, _) = h.finish().await;
        assert_eq!(controller.stage(), LearningStage::Listen);
        assert_eq!(controller.letter_index(), 0);
        assert!(controller.surface.is_blank());
        assert!(!controller.surface.is_pen_down());
        assert!(!controller.commit.is_armed());
    }
}
