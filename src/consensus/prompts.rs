//! Prompt registry: a small set of pure functions, one per `reasoning_method`,
//! each deterministic given the same question.

use crate::consensus::types::ReasoningMethod;
use crate::providers::{PromptMessage, Role};

/// A rendered prompt, ready to convert into provider-agnostic chat messages.
#[derive(Debug, Clone)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

impl RenderedPrompt {
    pub fn into_messages(self) -> Vec<PromptMessage> {
        vec![
            PromptMessage {
                role: Role::System,
                content: self.system,
            },
            PromptMessage {
                role: Role::User,
                content: self.user,
            },
        ]
    }
}

/// Render the initial prompt for one `(model, role)` pair.
///
/// `role` is `None` when the request's `roles` list is empty, in which case
/// a neutral template is used. When `enable_chain_of_thought` is set, the
/// question is wrapped in the scaffold named by `reasoning_method`.
pub fn render(question: &str, role: Option<&str>, enable_cot: bool, reasoning_method: ReasoningMethod) -> RenderedPrompt {
    let system = match role {
        Some(role) => format!(
            "You are acting as a {role} domain expert. Answer the following question \
             precisely from that domain's perspective, and give one clear final answer."
        ),
        None => "You are a helpful, rigorous assistant answering a single question directly \
                 and concisely."
            .to_string(),
    };

    let user = if enable_cot {
        cot_scaffold(reasoning_method, question)
    } else {
        question.to_string()
    };

    RenderedPrompt { system, user }
}

fn cot_scaffold(method: ReasoningMethod, question: &str) -> String {
    match method {
        ReasoningMethod::ChainOfThought => format!(
            "Think through this step by step before giving your final answer. Work through \
             your reasoning explicitly, then conclude with a single clearly marked final answer.\n\n\
             Question: {question}"
        ),
        ReasoningMethod::SocraticMethod => format!(
            "Explore this question Socratically: pose the key sub-questions that lead to the \
             answer, answer each in turn, and then state your conclusion as a single clearly \
             marked final answer.\n\n\
             Question: {question}"
        ),
        ReasoningMethod::MultiPerspective => format!(
            "Consider at least two distinct perspectives or approaches to this question, weigh \
             them against each other, and then give one synthesized final answer.\n\n\
             Question: {question}"
        ),
    }
}

/// Prompt asking `critic` to critique the current best answer.
pub fn critique_prompt(question: &str, current_answer: &str) -> RenderedPrompt {
    RenderedPrompt {
        system: "You are a rigorous critic reviewing another model's answer for correctness, \
                 completeness, and clarity."
            .to_string(),
        user: format!(
            "Question: {question}\n\nCandidate answer:\n{current_answer}\n\n\
             Identify concrete flaws or gaps in this answer. Be specific and concise."
        ),
    }
}

/// Prompt asking `reviser` to produce an improved answer given the critique.
pub fn revise_prompt(question: &str, current_answer: &str, critique: &str) -> RenderedPrompt {
    RenderedPrompt {
        system: "You revise a draft answer based on a critique, producing a single improved \
                 final answer."
            .to_string(),
        user: format!(
            "Question: {question}\n\nDraft answer:\n{current_answer}\n\nCritique:\n{critique}\n\n\
             Produce a single improved final answer that addresses the critique."
        ),
    }
}

/// Select the role for model index `i` out of `model_count` models, wrapping
/// if `roles` is shorter than `model_count`.
pub fn role_for(roles: &[String], i: usize, model_count: usize) -> Option<&str> {
    if roles.is_empty() || model_count == 0 {
        return None;
    }
    Some(roles[i % roles.len()].as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_template_used_when_roles_empty() {
        assert_eq!(role_for(&[], 0, 3), None);
    }

    #[test]
    fn role_wraps_when_fewer_roles_than_models() {
        let roles = vec!["a".to_string(), "b".to_string()];
        assert_eq!(role_for(&roles, 0, 3), Some("a"));
        assert_eq!(role_for(&roles, 1, 3), Some("b"));
        assert_eq!(role_for(&roles, 2, 3), Some("a"));
    }

    #[test]
    fn cot_scaffold_is_deterministic_and_contains_question() {
        let a = render("What is 2+2?", None, true, ReasoningMethod::SocraticMethod);
        let b = render("What is 2+2?", None, true, ReasoningMethod::SocraticMethod);
        assert_eq!(a.user, b.user);
        assert!(a.user.contains("What is 2+2?"));
    }

    #[test]
    fn no_cot_uses_question_verbatim() {
        let rendered = render("plain question", Some("physicist"), false, ReasoningMethod::ChainOfThought);
        assert_eq!(rendered.user, "plain question");
        assert!(rendered.system.contains("physicist"));
    }
}
