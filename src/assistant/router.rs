pub const ESCALATION_KEYWORDS: [&str; 4] = ["human", "agent", "person", "support"];

pub const HUMAN_ESCALATION_MESSAGE: &str =
    "It sounds like you need to speak with a human. I am transferring you to an agent now.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    HumanEscalation,
    Answer,
}

/// Case-insensitive substring check against [`ESCALATION_KEYWORDS`].
pub fn route(question: &str) -> Route {
    let question = question.to_lowercase();
    if ESCALATION_KEYWORDS
        .iter()
        .any(|keyword| question.contains(keyword))
    {
        Route::HumanEscalation
    } else {
        Route::Answer
    }
}
