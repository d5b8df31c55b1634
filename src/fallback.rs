//! Rule-based canned responses for the credential-less degraded mode.
//!
//! When no text provider credential is configured the orchestrator does
//! not fail — it answers from fixed response banks selected by intent.
//! Selection is deterministic: everything that varies (template choice,
//! conversational garnish, typing delay) derives from a hash of the
//! input message, so the same input always produces the same output.

use crate::Difficulty;
use crate::context::KnowledgeContext;

use std::hash::{Hash, Hasher};
use std::time::Duration;

/// Marker appended to every degraded-mode response.
pub const DEMO_MODE_MARKER: &str = "💡 *当前为演示模式，配置API密钥后可获得更智能的回答*";

/// Classified user intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Greeting,
    Explanation,
    Example,
    Practice,
    Question,
    Other,
}

/// Ordered rule table: first matching pattern wins. Patterns are matched
/// as substrings of the lowercased message.
const INTENT_RULES: &[(&[&str], Intent)] = &[
    (&["你好", "hi", "hello"], Intent::Greeting),
    (&["解释", "是什么", "概念"], Intent::Explanation),
    (&["例子", "举例", "示例"], Intent::Example),
    (&["练习", "题目", "做题"], Intent::Practice),
    (&["?", "？", "怎么", "为什么"], Intent::Question),
];

pub const GREETINGS: &[&str] = &[
    "你好！我是你的AI学习助手，很高兴为你服务！",
    "欢迎来到AI学习平台！我可以帮你解答数学问题。",
    "Hi！我是专门为数学学习设计的AI助手，有什么可以帮你的吗？",
];

pub const EXPLANATIONS: &[&str] = &[
    "让我来详细解释一下这个概念。",
    "这是一个很好的问题！我来为你分析一下。",
    "我理解你的疑问，让我从基础开始讲解。",
    "这个知识点确实需要仔细理解，我来帮你梳理一下。",
];

pub const EXAMPLES: &[&str] = &[
    "让我给你举个具体的例子来说明。",
    "通过一个实际例子，你会更容易理解。",
    "我用一个简单的例子来演示这个概念。",
    "举例说明总是最好的学习方法，来看这个例子。",
];

pub const PRACTICE: &[&str] = &[
    "练习是巩固知识的最好方法！",
    "让我们通过一些练习题来加深理解。",
    "我为你准备了一些针对性的练习题。",
    "做题是检验学习效果的好方法，我们开始吧！",
];

const CONNECTORS: &[&str] = &["另外，", "还有，", "补充一点，", "顺便说一下，"];

const ENCOURAGEMENTS: &[&str] = &[
    "\n\n有什么不明白的地方随时问我！",
    "\n\n希望这个解释对你有帮助！",
    "\n\n你还想了解什么相关内容吗？",
    "\n\n继续加油，你一定能掌握这个知识点！",
];

/// Math keywords surfaced back to the learner when mentioned.
const MATH_KEYWORDS: &[&str] = &["集合", "函数", "数列", "不等式", "三角函数", "指数", "对数"];

/// Canned deep-dive explanations per concept title.
fn knowledge_explanations(title: &str) -> Option<&'static [&'static str]> {
    match title {
        "集合的基本概念" | "集合的概念" => Some(&[
            "集合是数学中最基本的概念之一。简单来说，集合就是把一些确定的、不同的对象放在一起形成的整体。",
            "集合有三个重要特性：确定性（元素是否属于集合是明确的）、互异性（集合中的元素各不相同）、无序性（元素的排列顺序不影响集合）。",
            "我们通常用大写字母A、B、C等表示集合，用小写字母a、b、c等表示集合中的元素。如果a是集合A的元素，我们写作a∈A。",
        ]),
        "集合的表示方法" => Some(&[
            "集合主要有两种表示方法：列举法和描述法。",
            "列举法：把集合中的元素一一列举出来，写在大括号内。例如：A = {1, 2, 3, 4, 5}",
            "描述法：用集合中元素的共同特征来表示集合。例如：B = {x | x是小于10的正整数}",
        ]),
        "集合间的关系" => Some(&[
            "集合之间主要有三种关系：子集、真子集和相等。",
            "如果集合A的每一个元素都是集合B的元素，那么A是B的子集，记作A⊆B。",
            "如果A⊆B，且A≠B，那么A是B的真子集，记作A⊊B。",
        ]),
        _ => None,
    }
}

/// Classify a message against the ordered rule table.
pub fn classify_intent(message: &str) -> Intent {
    let lower = message.to_lowercase();
    for (patterns, intent) in INTENT_RULES {
        if patterns.iter().any(|p| lower.contains(p)) {
            return *intent;
        }
    }
    Intent::Other
}

/// Math keywords present in the message, in table order.
pub fn extract_keywords(message: &str) -> Vec<&'static str> {
    let lower = message.to_lowercase();
    MATH_KEYWORDS
        .iter()
        .copied()
        .filter(|k| lower.contains(k))
        .collect()
}

/// Deterministic seed for a message. Stable within a process run, which
/// is all determinism the degraded mode needs.
fn seed(message: &str) -> u64 {
    let mut hasher = std::hash::DefaultHasher::new();
    message.hash(&mut hasher);
    hasher.finish()
}

fn pick<'a>(set: &[&'a str], seed: u64) -> &'a str {
    set[(seed % set.len() as u64) as usize]
}

/// Simulated typing delay: bounded jitter in [800ms, 2000ms), derived
/// from the message so tests can pin it down.
pub fn typing_delay(message: &str) -> Duration {
    Duration::from_millis(800 + seed(message) % 1200)
}

/// Synthesize a degraded-mode response.
///
/// Combines the intent-selected template, context-aware enrichment
/// (knowledge bank, difficulty advice, keyword mentions), deterministic
/// conversational garnish, and the demo-mode marker.
pub fn respond(message: &str, context: Option<&KnowledgeContext>, history_len: usize) -> String {
    let intent = classify_intent(message);
    let keywords = extract_keywords(message);
    let seed = seed(message);

    let mut response = String::from(match intent {
        Intent::Greeting => pick(GREETINGS, seed),
        Intent::Explanation => pick(EXPLANATIONS, seed),
        Intent::Example => pick(EXAMPLES, seed),
        Intent::Practice => pick(PRACTICE, seed),
        Intent::Question | Intent::Other => pick(EXPLANATIONS, seed),
    });

    if let Some(concept) = context.and_then(|c| c.concept.as_ref()) {
        if intent == Intent::Explanation
            && let Some(explanations) = knowledge_explanations(&concept.title)
        {
            response.push_str("\n\n");
            response.push_str(pick(explanations, seed >> 8));
        }

        match concept.difficulty {
            Difficulty::Advanced => {
                response.push_str("\n\n💡 这是一个高难度知识点，建议你先确保掌握了前置知识再深入学习。");
            }
            Difficulty::Basic => {
                response.push_str("\n\n✨ 这是基础知识点，掌握好它对后续学习很重要！");
            }
            Difficulty::Intermediate => {}
        }
    }

    if !keywords.is_empty() {
        response.push_str(&format!(
            "\n\n我注意到你提到了\"{}\"，这些都是数学中的重要概念。",
            keywords.join("、")
        ));
    }

    // Conversational garnish for an ongoing exchange.
    if history_len > 2 && seed % 10 >= 7 {
        response = format!("{}{response}", pick(CONNECTORS, seed >> 16));
    }
    if seed % 10 >= 6 {
        response.push_str(pick(ENCOURAGEMENTS, seed >> 24));
    }

    response.push_str("\n\n");
    response.push_str(DEMO_MODE_MARKER);
    response
}

/// Default study tips per difficulty, used when no provider is available
/// or tip generation fails.
pub fn default_learning_tips(difficulty: Difficulty) -> Vec<String> {
    let tips: &[&str] = match difficulty {
        Difficulty::Basic => &[
            "建议多做基础练习题，打好基础",
            "可以通过画图或实例来理解概念",
            "不要急于求成，确保每个基础概念都理解透彻",
        ],
        Difficulty::Intermediate => &[
            "尝试将新知识与已学内容联系起来",
            "多思考概念之间的关系和应用场景",
            "适当增加练习难度，提升解题能力",
        ],
        Difficulty::Advanced => &[
            "需要大量练习来熟练掌握",
            "建议寻找多种解题方法，培养数学思维",
            "可以尝试一些竞赛题目来挑战自己",
        ],
    };
    tips.iter().map(|t| t.to_string()).collect()
}

/// Fixed four-step practice guidance for a concept.
pub fn exercise_suggestions(concept_title: &str) -> Vec<String> {
    vec![
        format!("针对\"{concept_title}\"，我建议你从基础题开始练习"),
        "先做几道概念理解题，确保理论基础扎实".to_string(),
        "然后尝试一些应用题，看看能否灵活运用".to_string(),
        "最后可以挑战一些综合性较强的题目".to_string(),
    ]
}
