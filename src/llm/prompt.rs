//! Tenant persona prompt construction and reply post-processing
//!
//! Builds the system prompt for the fallback chatbot from the tenant's
//! business profile, detects intent/sentiment with keyword heuristics, and
//! parses the action-tag protocol out of model replies.

use crate::db::BusinessProfile;
use crate::llm::ChatTurn;
use regex::Regex;
use serde_json::Value;
use std::fmt::Write;
use std::sync::OnceLock;

/// Knowledge-base excerpts are truncated to this length per document.
const KNOWLEDGE_DOC_LIMIT: usize = 3000;

/// Base prompt used when no tenant persona is available.
const BASE_PROMPT: &str = "You are Flowline — a universal conversational AI built for ANY business. Your job is to intelligently understand what a customer wants, respond professionally, and convert inquiries into actionable leads.";

const SAFETY_BLOCK: &str = "\
SAFETY RULES:
- Never provide medical, legal or financial advice beyond the business's published information.
- Never produce content that is violent, hateful or sexual.
- If a request is outside the business's scope, politely decline and steer back to the business's services.";

const RESPONSE_STYLE_BLOCK: &str = "
*** UNIVERSAL RESPONSE STYLE ***
- Friendly, professional, and concise.
- Simple explanations; do not overwhelm.
- STRICT RULE: Always end with a follow-up qualification question to move the conversation forward.
- Only provide info that is explicitly in the profile or FAQs. If unsure, ask for clarification.

*** UNIVERSAL LEAD ENGINE ***
1. Understand the Request -> Answer constraints/availability.
2. Qualify -> Ask for specifics (date, size, style, location).
3. Convert -> Propose the booking/order/visit.
4. Capture -> Ask for Name and Contact to confirm.
";

const ACTION_PROTOCOL_BLOCK: &str = r#"
*** ACTION PROTOCOLS (CRITICAL) ***
You have the ability to perform actions. Use the following tags at the END of your response if the condition is met.

1. LEAD CAPTURE (MAXIMUM PRIORITY):
   - CRITICAL: If the user provides a Name, Phone Number, or Email, you MUST capture it immediately.
   - Do NOT wait for all details. Capture whatever is provided (e.g., just a phone number).
   - Format: [ACTION: LEAD_CAPTURE | {"name": "Name", "email": "email", "phone": "phone", "notes": "extra context"}]

2. REQUIRED ANALYSIS (MANDATORY):
   - You MUST classify the User's message at the very end of every response.
   - Use one of these intents: booking_request, enquiry, pricing, support, greeting, features, integration, complaint, feedback, human.
   - Format: [ANALYSIS: <Intent> | <Sentiment>]

*** IMPORTANT ***
- Output the LEAD_CAPTURE tag BEFORE the ANALYSIS tag.
- Ensure the ANALYSIS tag is on its own line at the very end.
"#;

/// Industry-specific conversation playbooks keyed by a substring of the
/// tenant's declared industry.
const INDUSTRY_TEMPLATES: &[(&str, &str)] = &[
    (
        "real_estate",
        "\nINDUSTRY: REAL ESTATE\n- Show available units.\n- Ask for budget, location, rooms.\n- Offer inspection.\n",
    ),
    (
        "healthcare",
        "\nINDUSTRY: HEALTHCARE / CLINIC\n- Show service availability.\n- Offer appointment slots.\n- Collect patient details.\n",
    ),
    (
        "restaurant",
        "\nINDUSTRY: RESTAURANT\n- Show menu if asked.\n- Confirm delivery areas.\n- Collect order & customer info.\n",
    ),
    (
        "beauty",
        "\nINDUSTRY: BEAUTY SALON / SPA\n- Share prices.\n- Ask preferred style & date.\n- Book appointment.\n",
    ),
    (
        "retail",
        "\nINDUSTRY: SUPERMARKET / RETAIL\n- Confirm stock availability.\n- Reserve items.\n- Collect customer info.\n",
    ),
    (
        "logistics",
        "\nINDUSTRY: LOGISTICS / DELIVERY\n- Ask weight, pickup, destination.\n- Generate price estimate.\n- Book delivery.\n",
    ),
    (
        "education",
        "\nINDUSTRY: SCHOOL / TRAINING\n- Share course details.\n- Ask preferred session.\n- Collect name & WhatsApp.\n",
    ),
    (
        "consulting",
        "\nINDUSTRY: CONSULTING / SERVICES\n- Explain services.\n- Book consultation.\n",
    ),
    (
        "ngo",
        "\nINDUSTRY: NGO / COMMUNITY\n- Explain mission.\n- Accept donations or volunteer signups.\n",
    ),
];

/// Keyword rules for rule-based intent detection.
const INTENT_RULES: &[(&str, &[&str])] = &[
    ("booking_request", &["book", "appointment", "schedule", "reserve", "reservation", "slot"]),
    ("pricing", &["price", "pricing", "cost", "how much", "fee", "quote"]),
    ("support", &["help", "issue", "problem", "broken", "error", "support"]),
    ("greeting", &["hello", "hi", "hey", "good morning", "good afternoon"]),
    ("features", &["feature", "features", "capability", "what can"]),
    ("integration", &["integrate", "integration", "api", "connect"]),
    ("complaint", &["complaint", "refund", "angry", "disappointed"]),
    ("human", &["human", "agent", "person", "representative"]),
    ("enquiry", &["enquiry", "inquiry", "question", "interested", "info"]),
];

const POSITIVE_WORDS: &[&str] = &[
    "great", "thank", "love", "good", "amazing", "help", "cool", "nice", "awesome",
];
const NEGATIVE_WORDS: &[&str] = &[
    "bad", "terrible", "hate", "slow", "broken", "worst", "stupid", "useless", "fail",
];

const UNSAFE_KEYWORDS: &[&str] = &["suicide", "kill", "murder", "bomb", "terrorist", "hack"];

/// Intents the model is allowed to refine via the ANALYSIS tag.
const KNOWN_INTENTS: &[&str] = &[
    "booking_request",
    "booking",
    "enquiry",
    "pricing",
    "support",
    "greeting",
    "features",
    "integration",
    "complaint",
    "feedback",
    "human",
];

// ============================================================================
// Persona prompt
// ============================================================================

/// Build the fallback chatbot's system prompt from the tenant profile.
pub fn build_persona_prompt(profile: &BusinessProfile) -> String {
    let business_name = profile.name.as_deref().unwrap_or("this business");

    let mut prompt = format!(
        "You are the AI assistant for {business_name}. Your primary goal is to represent them professionally and help customers with their specific inquiries.\n"
    );

    match &profile.industry {
        Some(industry) => {
            let ind = industry.to_lowercase();
            let _ = writeln!(prompt, "\nIndustry: {industry}.");
            match INDUSTRY_TEMPLATES.iter().find(|(key, _)| ind.contains(key)) {
                Some((_, template)) => prompt.push_str(template),
                None => prompt.push_str(
                    "\nINDUSTRY: GENERAL BUSINESS\n- Explain services/products.\n- Answer inquiries professionally.\n- Collect customer info if interested.\n",
                ),
            }
        }
        None => prompt.push_str(
            "\nINDUSTRY: GENERAL\n- Provide helpful information about products/services.\n- Answer questions based on the details provided below.\n",
        ),
    }

    if let Some(description) = &profile.description {
        let _ = writeln!(prompt, "\nAbout {business_name}: {description}.");
    }
    if let Some(services) = &profile.services {
        let _ = writeln!(prompt, "\nServices Offered by {business_name}:\n{services}");
    }
    if let Some(tone) = &profile.tone {
        let _ = writeln!(prompt, "\nCommunication Tone: Use a {tone} tone in all messages.");
    }
    if let Some(hours) = &profile.hours {
        let _ = writeln!(prompt, "\nOperating Hours: {hours}");
    }
    if let Some(location) = &profile.location {
        let _ = writeln!(prompt, "Location: {location}");
    }
    if let Some(faq) = &profile.faq {
        let _ = writeln!(prompt, "\nFrequently Asked Questions (FAQ):\n{faq}");
    }
    if let Some(custom) = &profile.custom_instructions {
        let _ = writeln!(prompt, "\nSTRICT CUSTOM RULES:\n{custom}");
    }

    if !profile.knowledge_docs.is_empty() {
        prompt.push_str("\n*** BUSINESS KNOWLEDGE BASE ***\n");
        for doc in &profile.knowledge_docs {
            let content: String = doc.content.chars().take(KNOWLEDGE_DOC_LIMIT).collect();
            let _ = writeln!(prompt, "SOURCE: {}\n{content}\n", doc.title);
        }
    }

    prompt.push_str(RESPONSE_STYLE_BLOCK);
    let _ = writeln!(prompt, "\n{SAFETY_BLOCK}");
    prompt.push_str(ACTION_PROTOCOL_BLOCK);
    prompt.push_str("\nAlways be helpful, polite, and professional.");

    prompt
}

/// Assemble the message list for the provider. A caller-supplied system
/// instruction replaces the generic base prompt.
pub fn construct_messages(
    user_message: &str,
    history: &[ChatTurn],
    system_instruction: Option<&str>,
) -> Vec<ChatTurn> {
    let mut messages = Vec::new();

    let system_content = match system_instruction {
        Some(instruction) => instruction.to_string(),
        None => {
            let intent = detect_intent(user_message);
            format!("{BASE_PROMPT}\n\n{SAFETY_BLOCK}\n\nDetected Intent: {intent}")
        }
    };
    messages.push(ChatTurn::new("system", system_content));

    // Last five turns keep the request inside the token budget
    let tail = history.len().saturating_sub(5);
    messages.extend(history[tail..].iter().cloned());

    messages.push(ChatTurn::new("user", user_message));
    messages
}

// ============================================================================
// Heuristics
// ============================================================================

/// Rule-based intent detection; word-boundary keyword matches.
pub fn detect_intent(message: &str) -> &'static str {
    let lower = message.to_lowercase();
    for (intent, keywords) in INTENT_RULES {
        for keyword in *keywords {
            if contains_word(&lower, keyword) {
                return intent;
            }
        }
    }
    "general"
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    // Multi-word needles match as plain substrings
    if needle.contains(' ') {
        return haystack.contains(needle);
    }
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| word == needle)
}

/// Word-count sentiment heuristic.
pub fn analyze_sentiment(message: &str) -> &'static str {
    let lower = message.to_lowercase();
    let pos = POSITIVE_WORDS.iter().filter(|w| lower.contains(*w)).count();
    let neg = NEGATIVE_WORDS.iter().filter(|w| lower.contains(*w)).count();
    if pos > neg {
        "Positive"
    } else if neg > pos {
        "Negative"
    } else {
        "Neutral"
    }
}

/// Keyword safety screen. Returns false when the message trips the list.
pub fn check_safety(message: &str) -> bool {
    let lower = message.to_lowercase();
    for word in UNSAFE_KEYWORDS {
        if lower.contains(word) {
            tracing::warn!(keyword = %word, "Safety violation detected");
            return false;
        }
    }
    true
}

// ============================================================================
// Reply post-processing
// ============================================================================

/// Result of stripping the action-tag protocol from a model reply.
#[derive(Debug, Clone, Default)]
pub struct ProcessedReply {
    /// User-visible text with all tags removed
    pub text: String,
    /// Parsed LEAD_CAPTURE payload, if any
    pub lead: Option<Value>,
    /// Intent refined by the ANALYSIS tag
    pub intent: Option<String>,
    /// Sentiment refined by the ANALYSIS tag
    pub sentiment: Option<String>,
}

fn lead_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)\[ACTION: LEAD_CAPTURE\s*\|\s*(?P<json>\{.*?\})\]").unwrap()
    })
}

fn analysis_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\[ANALYSIS:\s*(?P<intent>.*?)\s*\|\s*(?P<sentiment>.*?)\s*\]").unwrap()
    })
}

fn leftover_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(?:ACTION|ANALYSIS):[^\]]*\]").unwrap())
}

/// Parse and strip `[ACTION: LEAD_CAPTURE | {..}]` and
/// `[ANALYSIS: intent | sentiment]` tags from a fallback reply.
pub fn process_reply(reply: &str) -> ProcessedReply {
    let mut text = reply.to_string();
    let mut processed = ProcessedReply::default();

    if let Some(caps) = lead_tag_re().captures(&text) {
        let raw = caps.name("json").map(|m| m.as_str().trim().to_string());
        let whole = caps.get(0).map(|m| m.as_str().to_string());
        if let (Some(raw), Some(whole)) = (raw, whole) {
            let cleaned = raw
                .trim_start_matches("```json")
                .trim_end_matches("```")
                .trim();
            match serde_json::from_str::<Value>(cleaned) {
                Ok(mut lead) => {
                    alias_contact_field(&mut lead);
                    processed.lead = Some(lead);
                }
                Err(e) => tracing::warn!(error = %e, "Unparseable LEAD_CAPTURE payload"),
            }
            text = text.replace(&whole, "");
        }
    }

    if let Some(caps) = analysis_tag_re().captures(&text) {
        let intent = caps
            .name("intent")
            .map(|m| m.as_str().trim().to_lowercase())
            .unwrap_or_default();
        let sentiment = caps.name("sentiment").map(|m| m.as_str().trim().to_string());
        let whole = caps.get(0).map(|m| m.as_str().to_string());
        if KNOWN_INTENTS.contains(&intent.as_str()) {
            processed.intent = Some(intent);
            processed.sentiment = sentiment;
        }
        if let Some(whole) = whole {
            text = text.replace(&whole, "");
        }
    }

    // Anything tag-shaped that survived is internal and must not reach users
    text = leftover_tag_re().replace_all(&text, "").to_string();
    processed.text = text.trim().to_string();
    processed
}

/// The model sometimes emits `contact` instead of `email`/`phone`; split it.
fn alias_contact_field(lead: &mut Value) {
    let Some(obj) = lead.as_object_mut() else { return };
    let has_email = obj.get("email").map_or(false, |v| !v.is_null());
    let has_phone = obj.get("phone").map_or(false, |v| !v.is_null());
    if has_email || has_phone {
        return;
    }
    if let Some(contact) = obj.remove("contact") {
        let contact_str = contact.as_str().unwrap_or_default().to_string();
        if contact_str.contains('@') {
            obj.insert("email".to_string(), Value::String(contact_str));
        } else if !contact_str.is_empty() {
            obj.insert("phone".to_string(), Value::String(contact_str));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::KnowledgeDoc;
    use serde_json::json;

    #[test]
    fn test_detect_intent() {
        assert_eq!(detect_intent("how much does it cost?"), "pricing");
        assert_eq!(detect_intent("I want to book a slot"), "booking_request");
        assert_eq!(detect_intent("hello there"), "greeting");
        assert_eq!(detect_intent("xyzzy"), "general");
        // Word boundary: "ship" must not match "hi"
        assert_eq!(detect_intent("shipment status"), "general");
    }

    #[test]
    fn test_analyze_sentiment() {
        assert_eq!(analyze_sentiment("this is great, thank you"), "Positive");
        assert_eq!(analyze_sentiment("terrible and broken"), "Negative");
        assert_eq!(analyze_sentiment("what time is it"), "Neutral");
    }

    #[test]
    fn test_check_safety() {
        assert!(check_safety("how do I book a table"));
        assert!(!check_safety("how to hack an account"));
    }

    #[test]
    fn test_persona_prompt_includes_profile_sections() {
        let profile = BusinessProfile {
            name: Some("Acme Clinic".to_string()),
            industry: Some("Healthcare".to_string()),
            description: Some("A family clinic".to_string()),
            services: Some("Checkups".to_string()),
            tone: Some("warm".to_string()),
            hours: Some("9-5".to_string()),
            knowledge_docs: vec![KnowledgeDoc {
                id: "d1".to_string(),
                doc_type: "file".to_string(),
                title: "Insurance".to_string(),
                content: "x".repeat(5000),
            }],
            ..Default::default()
        };
        let prompt = build_persona_prompt(&profile);
        assert!(prompt.contains("Acme Clinic"));
        assert!(prompt.contains("HEALTHCARE / CLINIC"));
        assert!(prompt.contains("UNIVERSAL LEAD ENGINE"));
        assert!(prompt.contains("LEAD_CAPTURE"));
        assert!(prompt.contains("SOURCE: Insurance"));
        // Doc truncated to the excerpt limit
        assert!(!prompt.contains(&"x".repeat(3001)));
    }

    #[test]
    fn test_construct_messages_caps_history() {
        let history: Vec<ChatTurn> = (0..10)
            .map(|i| ChatTurn::new("user", format!("m{i}")))
            .collect();
        let messages = construct_messages("latest", &history, Some("persona"));
        // system + 5 history + user
        assert_eq!(messages.len(), 7);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].content, "m5");
        assert_eq!(messages.last().unwrap().content, "latest");
    }

    #[test]
    fn test_process_reply_strips_tags_and_parses_lead() {
        let reply = "Sure, we can help!\n[ACTION: LEAD_CAPTURE | {\"name\": \"Jo\", \"contact\": \"jo@x.io\"}]\n[ANALYSIS: pricing | Positive]";
        let processed = process_reply(reply);
        assert_eq!(processed.text, "Sure, we can help!");
        let lead = processed.lead.unwrap();
        assert_eq!(lead["email"], json!("jo@x.io"));
        assert!(lead.get("contact").is_none());
        assert_eq!(processed.intent.as_deref(), Some("pricing"));
        assert_eq!(processed.sentiment.as_deref(), Some("Positive"));
    }

    #[test]
    fn test_process_reply_ignores_unknown_intent() {
        let processed = process_reply("ok [ANALYSIS: world_domination | Evil]");
        assert!(processed.intent.is_none());
        assert_eq!(processed.text, "ok");
    }

    #[test]
    fn test_process_reply_aliases_phone_contact() {
        let reply = r#"[ACTION: LEAD_CAPTURE | {"name": "Sam", "contact": "15550001111"}]"#;
        let lead = process_reply(reply).lead.unwrap();
        assert_eq!(lead["phone"], json!("15550001111"));
    }

    #[test]
    fn test_process_reply_scrubs_leftover_tags() {
        let processed = process_reply("hello [ACTION: SCHEDULE] world");
        assert_eq!(processed.text, "hello  world".trim());
    }
}
