//! Built-in prompt templates and the renderers that fill them.
//!
//! The evaluation template carries the grading rubric (1.5 accuracy, 1.5 complete
//! sentence, 2 grammar mechanics, 5.0 total). The review template repeats it so the
//! second pass grades against the same scale.

use crate::domain::StudentEvaluation;
use crate::util::fill_template;

pub const VALIDATE_RESPONSE_SYSTEM_PROMPT: &str = r#"You are responsible for validating a response from a 10 year old student who is asking questions about the following article:

{article}

The student was asked the following question:
{question}

Please grade their response:
{response}

Grading criteria:
1.5 points for accuracy
1.5 points for writing a complete sentence
2 points for grammar

Here are key points for grammar:
1. The sentences must have a period at the end
2. Must start with a capital letter and have Capital letters for proper nouns
3. Must have proper accented characters for French

Provide your response in the following JSON format:
{
  "score": (number between 0 and 5),
  "correction": "(detailed explanation in French of the grade, including what was done well and what could be improved. Even for perfect scores, provide encouraging feedback.  No more than 30 words)",
  "suggestedAnswer": "(write a model answer in French that would receive a perfect score. Keep it concise but complete.)"
}"#;

pub const REVIEW_RESPONSE_SYSTEM_PROMPT: &str = r#"You are responsible for reviewing the evaluation of a student's response. Here is the original grading criteria:

Grading criteria:
1.5 points for accuracy
1.5 points for writing a complete sentence
2 points for grammar

Grammar key points:
1. The sentences must have a period at the end
2. Must start with a capital letter and have Capital letters for proper nouns
3. Must have proper accented characters for French

Please review the following:
Story: {story}
Question: {question}
Student Response: {response}

Initial Evaluation:
Score: {score}
Correction: {correction}
Suggested Answer: {suggestedAnswer}

Review this evaluation and determine if the score and correction align with the response and grading criteria.

Provide your response in the following JSON format:
{
  "isScoreAccurate": boolean,
  "finalScore": number,
  "finalCorrection": "string (use original correction if accurate, otherwise provide revised correction)",
  "reviewComments": "string (explain why changes were made or why original evaluation was correct)"
}"#;

pub const GENERATE_QUESTIONS_SYSTEM_PROMPT: &str = r#"You are a French language teacher creating quiz questions for 10-year-old students. Your task is to generate 3-5 questions based on the provided story.

IMPORTANT:
1. Questions must be in French
2. Questions must be based on information present in the story
3. Questions should be appropriate for a 10-year-old's comprehension level
4. Questions should test understanding of the story content
5. Questions should vary in difficulty

Output format:
{
  "questions": [
    "Question 1 in French",
    "Question 2 in French",
    "Question 3 in French"
  ]
}"#;

pub const GENERATE_STORY_SYSTEM_PROMPT: &str =
  "You are a creative story generator. Generate an engaging story based on the provided text.";

/// Student-evaluation prompt: story, question and the student's response.
pub fn render_evaluation(template: &str, story: &str, question: &str, response: &str) -> String {
  fill_template(
    template,
    &[("article", story), ("question", question), ("response", response)],
  )
}

/// Teacher-review prompt: the same inputs plus the first-pass verdict as evidence.
pub fn render_review(
  template: &str,
  story: &str,
  question: &str,
  response: &str,
  evaluation: &StudentEvaluation,
) -> String {
  let score = evaluation.score.to_string();
  fill_template(
    template,
    &[
      ("story", story),
      ("question", question),
      ("response", response),
      ("score", &score),
      ("correction", &evaluation.correction),
      ("suggestedAnswer", &evaluation.suggested_answer),
    ],
  )
}
