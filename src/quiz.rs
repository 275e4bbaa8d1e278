//! Quiz state machine and the session adapter that drives it.
//!
//! `QuizState::transition` is pure: it returns the next state plus, at most, one
//! effect. `QuizSession` owns a state, applies events, and performs the effect
//! (mark-story-read) when the quiz enters `Completed`.
//!
//! Phases: AwaitingStory -> InProgress -> Completed. Loading questions resets
//! everything, from any phase.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::{Prompts, QuestionSettings};
use crate::domain::{Story, StoryCompletion};
use crate::openai::ChatBackend;
use crate::protocol::QuizView;
use crate::questions::{generate_questions, GenerationError};
use crate::store::{Store, StoreError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizPhase {
  #[default]
  AwaitingStory,
  InProgress,
  Completed,
}

/// One graded answer as reported to the quiz.
#[derive(Clone, Debug, PartialEq)]
pub struct GradedAnswer {
  pub index: usize,
  pub grade: f64,
  pub response: String,
  pub correction: String,
  pub suggested_answer: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum QuizEvent {
  QuestionsLoaded(Vec<String>),
  Answered(GradedAnswer),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuizEffect {
  /// All questions answered: persist the aggregate on the story.
  MarkStoryRead,
}

#[derive(Debug)]
pub struct Transition {
  pub state: QuizState,
  pub effect: Option<QuizEffect>,
}

impl Transition {
  fn unchanged(state: QuizState) -> Self {
    Self { state, effect: None }
  }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QuizState {
  phase: QuizPhase,
  questions: Vec<String>,
  current_index: usize,
  answered: BTreeSet<usize>,
  scores: Vec<Option<f64>>,
  responses: Vec<Option<String>>,
  corrections: Vec<Option<String>>,
  suggested_answers: Vec<Option<String>>,
  total_score: f64,
}

impl QuizState {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn transition(self, event: QuizEvent) -> Transition {
    match event {
      QuizEvent::QuestionsLoaded(questions) => {
        let n = questions.len();
        Transition::unchanged(QuizState {
          phase: QuizPhase::InProgress,
          questions,
          current_index: 0,
          answered: BTreeSet::new(),
          scores: vec![None; n],
          responses: vec![None; n],
          corrections: vec![None; n],
          suggested_answers: vec![None; n],
          total_score: 0.0,
        })
      }
      QuizEvent::Answered(answer) => self.record(answer),
    }
  }

  fn record(mut self, answer: GradedAnswer) -> Transition {
    if self.phase != QuizPhase::InProgress {
      debug!(target: "quiz", phase = ?self.phase, index = answer.index, "Answer ignored outside of a running quiz");
      return Transition::unchanged(self);
    }
    let i = answer.index;
    if i >= self.questions.len() {
      debug!(target: "quiz", index = i, total = self.questions.len(), "Answer ignored: no such question");
      return Transition::unchanged(self);
    }
    if self.answered.contains(&i) {
      debug!(target: "quiz", index = i, "Answer ignored: question already graded");
      return Transition::unchanged(self);
    }

    self.scores[i] = Some(answer.grade);
    self.responses[i] = Some(answer.response);
    self.corrections[i] = Some(answer.correction);
    self.suggested_answers[i] = Some(answer.suggested_answer);
    self.total_score += answer.grade;
    self.answered.insert(i);

    let last = self.questions.len() - 1;
    if i < last {
      self.current_index = self.current_index.max(i + 1);
    }

    // Counted after this answer was recorded.
    if self.answered.len() == self.questions.len() {
      self.phase = QuizPhase::Completed;
      return Transition { state: self, effect: Some(QuizEffect::MarkStoryRead) };
    }
    Transition::unchanged(self)
  }

  pub fn phase(&self) -> QuizPhase {
    self.phase
  }

  pub fn questions(&self) -> &[String] {
    &self.questions
  }

  pub fn current_index(&self) -> usize {
    self.current_index
  }

  /// First unanswered index at or after `current_index`, wrapping to the
  /// start. `current_index` itself may already be answered when questions
  /// are taken out of order.
  pub fn next_unanswered(&self) -> Option<usize> {
    let n = self.questions.len();
    let start = self.current_index.min(n);
    (start..n).chain(0..start).find(|i| !self.answered.contains(i))
  }

  pub fn current_question(&self) -> Option<&str> {
    self.next_unanswered().map(|i| self.questions[i].as_str())
  }

  pub fn answered(&self) -> &BTreeSet<usize> {
    &self.answered
  }

  pub fn is_answered(&self, index: usize) -> bool {
    self.answered.contains(&index)
  }

  pub fn scores(&self) -> &[Option<f64>] {
    &self.scores
  }

  pub fn responses(&self) -> &[Option<String>] {
    &self.responses
  }

  pub fn corrections(&self) -> &[Option<String>] {
    &self.corrections
  }

  pub fn suggested_answers(&self) -> &[Option<String>] {
    &self.suggested_answers
  }

  pub fn total_score(&self) -> f64 {
    self.total_score
  }

  pub fn is_completed(&self) -> bool {
    self.phase == QuizPhase::Completed
  }

  /// Both checks matter: index and answered-count drift apart when questions
  /// are answered out of order.
  pub fn has_more_questions(&self) -> bool {
    self.current_index < self.questions.len() && self.answered.len() < self.questions.len()
  }

  /// Aggregate for mark-story-read.
  pub fn completion(&self, user_email: &str, story_id: &str) -> StoryCompletion {
    let flatten = |v: &[Option<String>]| -> Vec<String> {
      v.iter().map(|s| s.clone().unwrap_or_default()).collect()
    };
    StoryCompletion {
      user_email: user_email.to_string(),
      story_id: story_id.to_string(),
      quiz_score: self.total_score,
      total_questions: u32::try_from(self.questions.len()).unwrap_or(u32::MAX),
      questions: self.questions.clone(),
      question_responses: flatten(&self.responses),
      question_corrections: flatten(&self.corrections),
      suggested_answers: Some(flatten(&self.suggested_answers)),
    }
  }
}

/// Where a finished quiz gets recorded.
pub trait CompletionSink: Send + Sync {
  fn record_completion(
    &self,
    completion: &StoryCompletion,
  ) -> impl Future<Output = Result<Story, StoreError>> + Send;
}

impl CompletionSink for Store {
  async fn record_completion(&self, completion: &StoryCompletion) -> Result<Story, StoreError> {
    self.mark_story_read(completion).await
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnswerOutcome {
  /// Duplicate, out of range, or the quiz isn't running.
  Ignored,
  Recorded,
  /// Last answer recorded; `persisted` tells whether mark-story-read succeeded.
  Completed { persisted: bool },
}

/// One user's quiz over one story.
#[derive(Debug)]
pub struct QuizSession {
  id: String,
  user_email: String,
  story_id: String,
  story: String,
  state: QuizState,
  touched: Instant,
}

impl QuizSession {
  pub fn new(user_email: &str, story_id: &str) -> Self {
    Self {
      id: Uuid::new_v4().to_string(),
      user_email: user_email.to_string(),
      story_id: story_id.to_string(),
      story: String::new(),
      state: QuizState::new(),
      touched: Instant::now(),
    }
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn user_email(&self) -> &str {
    &self.user_email
  }

  pub fn story_id(&self) -> &str {
    &self.story_id
  }

  pub fn story(&self) -> &str {
    &self.story
  }

  pub fn state(&self) -> &QuizState {
    &self.state
  }

  /// Completed sessions expire `completed_grace` after their last answer;
  /// any other session after `idle` without activity.
  pub fn is_expired(&self, now: Instant, completed_grace: Duration, idle: Duration) -> bool {
    let quiet = now.saturating_duration_since(self.touched);
    if self.state.is_completed() {
      quiet >= completed_grace
    } else {
      quiet >= idle
    }
  }

  fn apply(&mut self, event: QuizEvent) -> Option<QuizEffect> {
    self.touched = Instant::now();
    let t = std::mem::take(&mut self.state).transition(event);
    self.state = t.state;
    t.effect
  }

  /// Install a question list for `story`; resets any quiz in progress.
  pub fn load_questions(&mut self, story: &str, questions: Vec<String>) {
    info!(target: "quiz", session = %self.id, count = questions.len(), "Questions installed");
    self.story = story.to_string();
    self.apply(QuizEvent::QuestionsLoaded(questions));
  }

  /// Generate questions for `story` and install them. Blank text keeps the
  /// session where it is.
  #[instrument(level = "info", target = "quiz", skip_all, fields(session = %self.id, story_len = story.len()))]
  pub async fn set_story<C: ChatBackend>(
    &mut self,
    backend: &C,
    settings: &QuestionSettings,
    prompts: &Prompts,
    story: &str,
  ) -> Result<(), GenerationError> {
    let questions = generate_questions(backend, settings, prompts, story).await?;
    self.load_questions(story, questions);
    Ok(())
  }

  /// Record a graded answer. On entry to `Completed` the aggregate is written
  /// through `sink` exactly once; a write failure is logged and the quiz stays completed.
  #[instrument(level = "info", target = "quiz", skip_all, fields(session = %self.id, index = answer.index, grade = answer.grade))]
  pub async fn mark_answered<S: CompletionSink>(&mut self, sink: &S, answer: GradedAnswer) -> AnswerOutcome {
    let before = self.state.answered.len();
    let effect = self.apply(QuizEvent::Answered(answer));
    if self.state.answered.len() == before {
      return AnswerOutcome::Ignored;
    }

    match effect {
      Some(QuizEffect::MarkStoryRead) => {
        let completion = self.state.completion(&self.user_email, &self.story_id);
        info!(target: "quiz", total_score = completion.quiz_score, total_questions = completion.total_questions, "Quiz completed");
        match sink.record_completion(&completion).await {
          Ok(_) => AnswerOutcome::Completed { persisted: true },
          Err(e) => {
            warn!(target: "quiz", story_id = %self.story_id, error = %e, "Could not mark story as read");
            AnswerOutcome::Completed { persisted: false }
          }
        }
      }
      None => AnswerOutcome::Recorded,
    }
  }

  pub fn view(&self) -> QuizView {
    let s = &self.state;
    QuizView {
      id: self.id.clone(),
      story_id: self.story_id.clone(),
      phase: s.phase(),
      questions: s.questions().to_vec(),
      current_question_index: s.current_index(),
      current_question: s.current_question().map(str::to_string),
      answered_questions: s.answered().iter().copied().collect(),
      scores: s.scores().to_vec(),
      responses: s.responses().to_vec(),
      corrections: s.corrections().to_vec(),
      suggested_answers: s.suggested_answers().to_vec(),
      total_score: s.total_score(),
      is_completed: s.is_completed(),
      has_more_questions: s.has_more_questions(),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use super::*;
  use crate::openai::testing::ScriptedBackend;

  fn qs(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("Question {i} ?")).collect()
  }

  fn graded(index: usize, grade: f64) -> GradedAnswer {
    GradedAnswer {
      index,
      grade,
      response: format!("réponse {index}"),
      correction: format!("correction {index}"),
      suggested_answer: format!("modèle {index}"),
    }
  }

  fn answer(state: QuizState, index: usize, grade: f64) -> Transition {
    state.transition(QuizEvent::Answered(graded(index, grade)))
  }

  #[derive(Default)]
  struct RecordingSink {
    calls: Mutex<Vec<StoryCompletion>>,
    fail: bool,
  }

  impl CompletionSink for RecordingSink {
    async fn record_completion(&self, completion: &StoryCompletion) -> Result<Story, StoreError> {
      self.calls.lock().unwrap().push(completion.clone());
      if self.fail {
        return Err(StoreError::StoryNotFound {
          story_id: completion.story_id.clone(),
          user_email: completion.user_email.clone(),
        });
      }
      Ok(Story {
        id: completion.story_id.clone(),
        user_email: completion.user_email.clone(),
        source_text: String::new(),
        title: String::new(),
        article: String::new(),
        read: true,
        quiz_score: Some(completion.quiz_score),
        total_questions: Some(completion.total_questions),
        questions: Some(completion.questions.clone()),
        question_responses: Some(completion.question_responses.clone()),
        question_corrections: Some(completion.question_corrections.clone()),
        suggested_answers: completion.suggested_answers.clone(),
        created_at: String::new(),
        updated_at: String::new(),
      })
    }
  }

  #[test]
  fn starts_awaiting_story_and_ignores_answers() {
    let s = QuizState::new();
    assert_eq!(s.phase(), QuizPhase::AwaitingStory);
    assert!(!s.has_more_questions());
    let t = answer(s.clone(), 0, 5.0);
    assert_eq!(t.state, s);
    assert!(t.effect.is_none());
  }

  #[test]
  fn loading_questions_resets_progress() {
    let s = QuizState::new().transition(QuizEvent::QuestionsLoaded(qs(3))).state;
    let s = answer(s, 0, 4.0).state;
    assert_eq!(s.current_index(), 1);

    let s = s.transition(QuizEvent::QuestionsLoaded(qs(2))).state;
    assert_eq!(s.phase(), QuizPhase::InProgress);
    assert_eq!(s.current_index(), 0);
    assert!(s.answered().is_empty());
    assert_eq!(s.total_score(), 0.0);
    assert_eq!(s.scores(), &[None, None]);
    assert_eq!(s.current_question(), Some("Question 1 ?"));
  }

  #[test]
  fn three_questions_in_order_complete_once() {
    let s = QuizState::new().transition(QuizEvent::QuestionsLoaded(qs(3))).state;
    let t = answer(s, 0, 4.0);
    assert!(t.effect.is_none());
    let t = answer(t.state, 1, 5.0);
    assert!(t.effect.is_none());
    assert_eq!(t.state.current_index(), 2);
    let t = answer(t.state, 2, 3.0);
    assert_eq!(t.effect, Some(QuizEffect::MarkStoryRead));

    let s = t.state;
    assert!(s.is_completed());
    assert_eq!(s.total_score(), 12.0);
    assert_eq!(s.current_index(), 2);
    assert!(!s.has_more_questions());

    // Re-answering after completion changes nothing and fires nothing.
    let t = answer(s.clone(), 2, 1.0);
    assert_eq!(t.state, s);
    assert!(t.effect.is_none());
  }

  #[test]
  fn duplicate_answers_are_no_ops() {
    let s = QuizState::new().transition(QuizEvent::QuestionsLoaded(qs(3))).state;
    let once = answer(s, 1, 2.5).state;
    let twice = answer(once.clone(), 1, 5.0).state;
    assert_eq!(once, twice);
    assert_eq!(twice.scores()[1], Some(2.5));
    assert_eq!(twice.total_score(), 2.5);
    assert_eq!(twice.answered().len(), 1);
  }

  #[test]
  fn out_of_order_answers_complete_with_matching_total() {
    let s = QuizState::new().transition(QuizEvent::QuestionsLoaded(qs(4))).state;
    let mut t = answer(s, 2, 3.5);
    assert_eq!(t.state.current_index(), 3);
    let mut effects = 0;
    for (i, g) in [(0, 1.0), (3, 5.0), (1, 4.5)] {
      t = answer(t.state, i, g);
      if t.effect.is_some() {
        effects += 1;
      }
    }
    let s = t.state;
    assert_eq!(effects, 1);
    assert!(s.is_completed());
    let sum: f64 = s.scores().iter().map(|g| g.unwrap()).sum();
    assert_eq!(s.total_score(), sum);
    assert_eq!(s.total_score(), 14.0);
    // Index never moved backwards.
    assert_eq!(s.current_index(), 3);
  }

  #[test]
  fn has_more_questions_needs_both_conditions() {
    let s = QuizState::new().transition(QuizEvent::QuestionsLoaded(qs(3))).state;
    // Answer the last one first: current stays 0, one answered.
    let s = answer(s, 2, 1.0).state;
    assert_eq!(s.current_index(), 0);
    assert!(s.has_more_questions());
    let s = answer(s, 0, 1.0).state;
    assert_eq!(s.current_index(), 1);
    assert!(s.has_more_questions());
  }

  #[test]
  fn current_question_skips_answered_ones() {
    let s = QuizState::new().transition(QuizEvent::QuestionsLoaded(qs(3))).state;
    let s = answer(s, 1, 3.0).state;
    assert_eq!(s.current_index(), 2);
    assert_eq!(s.current_question(), Some("Question 3 ?"));

    // Last index answered: the index stays on it, so presentation wraps.
    let s = answer(s, 2, 3.0).state;
    assert_eq!(s.current_index(), 2);
    assert!(s.has_more_questions());
    assert_eq!(s.next_unanswered(), Some(0));
    assert_eq!(s.current_question(), Some("Question 1 ?"));
    assert!(!s.is_answered(s.next_unanswered().unwrap()));

    let s = answer(s, 0, 3.0).state;
    assert!(s.is_completed());
    assert_eq!(s.current_question(), None);
  }

  #[tokio::test]
  async fn expiry_depends_on_completion() {
    let sink = RecordingSink::default();
    let mut session = QuizSession::new("eleve@ecole.fr", "story-1");
    session.load_questions("Histoire", qs(1));
    let grace = Duration::from_secs(60);
    let idle = Duration::from_secs(3600);
    let later = Instant::now() + Duration::from_secs(120);
    assert!(!session.is_expired(later, grace, idle));

    session.mark_answered(&sink, graded(0, 2.0)).await;
    assert!(session.is_expired(Instant::now() + Duration::from_secs(120), grace, idle));
    assert!(!session.is_expired(Instant::now(), grace, idle));
  }

  #[test]
  fn empty_question_list_never_presents_or_completes() {
    let s = QuizState::new().transition(QuizEvent::QuestionsLoaded(vec![])).state;
    assert_eq!(s.phase(), QuizPhase::InProgress);
    assert!(!s.has_more_questions());
    assert_eq!(s.current_question(), None);
    let t = answer(s.clone(), 0, 5.0);
    assert_eq!(t.state, s);
    assert!(t.effect.is_none());
    assert!(!t.state.is_completed());
  }

  #[test]
  fn completion_carries_full_arrays() {
    let s = QuizState::new().transition(QuizEvent::QuestionsLoaded(qs(2))).state;
    let s = answer(s, 0, 4.0).state;
    let s = answer(s, 1, 3.0).state;
    let c = s.completion("eleve@ecole.fr", "story-1");
    assert_eq!(c.quiz_score, 7.0);
    assert_eq!(c.total_questions, 2);
    assert_eq!(c.questions, qs(2));
    assert_eq!(c.question_responses, vec!["réponse 0", "réponse 1"]);
    assert_eq!(c.question_corrections, vec!["correction 0", "correction 1"]);
    assert!(c.score_in_range());
  }

  #[tokio::test]
  async fn session_fires_mark_read_exactly_once() {
    let sink = RecordingSink::default();
    let mut session = QuizSession::new("eleve@ecole.fr", "story-1");
    session.load_questions("Les chats dorment.", qs(3));

    assert_eq!(session.mark_answered(&sink, graded(0, 4.0)).await, AnswerOutcome::Recorded);
    assert_eq!(session.mark_answered(&sink, graded(0, 4.0)).await, AnswerOutcome::Ignored);
    assert_eq!(session.mark_answered(&sink, graded(1, 5.0)).await, AnswerOutcome::Recorded);
    assert_eq!(
      session.mark_answered(&sink, graded(2, 3.0)).await,
      AnswerOutcome::Completed { persisted: true }
    );
    assert_eq!(session.mark_answered(&sink, graded(2, 3.0)).await, AnswerOutcome::Ignored);

    let calls = sink.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].quiz_score, 12.0);
    assert_eq!(calls[0].total_questions, 3);
    assert_eq!(calls[0].story_id, "story-1");
  }

  #[tokio::test]
  async fn failed_completion_write_keeps_quiz_completed() {
    let sink = RecordingSink { fail: true, ..Default::default() };
    let mut session = QuizSession::new("eleve@ecole.fr", "story-1");
    session.load_questions("Histoire", qs(1));
    let outcome = session.mark_answered(&sink, graded(0, 2.0)).await;
    assert_eq!(outcome, AnswerOutcome::Completed { persisted: false });
    assert!(session.state().is_completed());
    assert!(session.view().is_completed);
    assert_eq!(sink.calls.lock().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn completion_is_written_to_the_store() {
    let store = Store::open_in_memory().await.unwrap();
    let story = store.create_story("eleve@ecole.fr", "Chats", "src", "Les chats dorment.").await.unwrap();
    let mut session = QuizSession::new("eleve@ecole.fr", &story.id);
    session.load_questions(&story.article, qs(2));
    session.mark_answered(&store, graded(1, 5.0)).await;
    let outcome = session.mark_answered(&store, graded(0, 2.5)).await;
    assert_eq!(outcome, AnswerOutcome::Completed { persisted: true });

    let saved = store.get_story(&story.id).await.unwrap().unwrap();
    assert!(saved.read);
    assert_eq!(saved.quiz_score, Some(7.5));
    assert_eq!(saved.total_questions, Some(2));
  }

  #[tokio::test]
  async fn set_story_generates_and_installs_questions() {
    let backend = ScriptedBackend::new([Ok(r#"{"questions": ["Que font les chats?", "Où dorment-ils?"]}"#)]);
    let mut session = QuizSession::new("eleve@ecole.fr", "story-1");
    session
      .set_story(&backend, &QuestionSettings::default(), &Prompts::default(), "Les chats dorment beaucoup.")
      .await
      .unwrap();
    assert_eq!(session.state().phase(), QuizPhase::InProgress);
    assert_eq!(session.state().questions().len(), 2);
    assert_eq!(session.story(), "Les chats dorment beaucoup.");

    let view = session.view();
    assert_eq!(view.current_question_index, 0);
    assert!(view.has_more_questions);
  }

  #[tokio::test]
  async fn blank_story_keeps_awaiting() {
    let backend = ScriptedBackend::new(Vec::<Result<&str, &str>>::new());
    let mut session = QuizSession::new("eleve@ecole.fr", "story-1");
    let err = session
      .set_story(&backend, &QuestionSettings::default(), &Prompts::default(), "")
      .await
      .unwrap_err();
    assert!(matches!(err, GenerationError::InvalidInput(_)));
    assert_eq!(session.state().phase(), QuizPhase::AwaitingStory);
    assert_eq!(backend.call_count(), 0);
  }
}
