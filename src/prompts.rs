//! Burmese query templates, one per question type.

use crate::extraction::native_choice;
use crate::models::{BenchmarkExample, QuestionType};
use tracing::warn;

pub const MULTIPLE_CHOICE_TEMPLATE: &str = "အောက်ပါ မေးခွန်းအတွက် အဖြေမှန်ကို ရွေးပါ။ သင့်အဖြေ၏ နောက်ဆုံးစာကြောင်းသည် 'အဖြေ: $အစဉ်' (ဥပမာ- 'အဖြေ: က') ဖြစ်ရမည်။ $အစဉ် သည် ({letters}) တစ်ခုဖြစ်ရမည်။ အဖြေမပေးမီ အဆင့်ဆင့်စဉ်းစားပြီး ရွေးချယ်ပါ။\n\n{question}\n\n{options}";

pub const TRUE_FALSE_TEMPLATE: &str = "အောက်ပါကို မှားလျှင် (မှား)၊ မှန်လျှင် (မှန်) ဟု ဖြေဆိုပါ။ သင့်အဖြေ၏ နောက်ဆုံးစာကြောင်းသည် ဤပုံစံဖြစ်သင့်သည် - 'အဖြေ: မှန်' သိုမဟုတ် 'အဖြေ: မှား' (ကိုးကားချက်အမှတ်အသား မပါဘဲ)။ အဖြေမပေးခင် အဆင့်ဆင့်စဉ်းစားပါ။\n\n{question}";

pub const FILL_IN_BLANK_TEMPLATE: &str = "အောက်ပါစာကြောင်းရှိ ကွက်လပ်ကိုဖြည့်ပါ။ သင့်အဖြေ၏ နောက်ဆုံးစာကြောင်းသည် ဤပုံစံဖြစ်သင့်သည် - 'အဖြေ: $စာလုံး' (ကိုးကားချက်အမှတ်အသား မပါဘဲ) စာလုံး သည် ကွက်လပ်အတွက် အသင့်တော်ဆုံး စကားလုံးဖြစ်သင့်သည်။ အဖြေမပေးခင် အဆင့်ဆင့်စဉ်းစားပါ။\n\n{question}";

pub const OPEN_QUESTION_TEMPLATE: &str = "အောက်ပါတို့ကို ဖြေဆိုပါ\n\n{question}";

/// Turn an example into the user prompt.
///
/// A multiple choice question without at least options a–c cannot fill its
/// template; it falls back to the bare question text instead of failing.
pub fn format_question(example: &BenchmarkExample) -> String {
    let question = example.question.trim();
    match example.question_type {
        QuestionType::Mcq => match format_options(example) {
            Some((letters, options)) => fill_template(
                MULTIPLE_CHOICE_TEMPLATE,
                &[("letters", &letters), ("question", question), ("options", &options)],
            ),
            None => {
                warn!(example_id = %example.id, "Missing choice options, using bare question text");
                question.to_string()
            }
        },
        QuestionType::Tof => fill_template(TRUE_FALSE_TEMPLATE, &[("question", question)]),
        QuestionType::Fib => fill_template(FILL_IN_BLANK_TEMPLATE, &[("question", question)]),
        QuestionType::ShortQna | QuestionType::LongQna | QuestionType::MetaphorQna => {
            fill_template(OPEN_QUESTION_TEMPLATE, &[("question", question)])
        }
    }
}

/// Substitute `{name}` placeholders in one pass; inserted values are never rescanned
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut filled = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        filled.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let value = after.find('}').and_then(|end| {
            values
                .iter()
                .find(|(name, _)| *name == &after[..end])
                .map(|(_, value)| (*value, end))
        });
        match value {
            Some((value, end)) => {
                filled.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                filled.push('{');
                rest = after;
            }
        }
    }
    filled.push_str(rest);
    filled
}

/// Render `(က) ...` option lines; the fourth option is optional
fn format_options(example: &BenchmarkExample) -> Option<(String, String)> {
    let required = [&example.option_a, &example.option_b, &example.option_c];
    let mut options: Vec<&str> = Vec::with_capacity(4);
    for option in required {
        options.push(option.as_deref().map(str::trim).filter(|o| !o.is_empty())?);
    }
    if let Some(d) = example.option_d.as_deref().map(str::trim).filter(|o| !o.is_empty()) {
        options.push(d);
    }

    let mut letters = Vec::with_capacity(options.len());
    let mut lines = Vec::with_capacity(options.len());
    for (index, text) in options.iter().enumerate() {
        let letter = native_choice(index)?;
        letters.push(letter);
        lines.push(format!("({}) {}", letter, text));
    }
    Some((letters.join("၊ "), lines.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example(question_type: QuestionType) -> BenchmarkExample {
        BenchmarkExample {
            id: "1".to_string(),
            question_type,
            question: " မြန်မာနိုင်ငံ၏ မြို့တော်မှာ အဘယ်နည်း။ ".to_string(),
            answer: "C".to_string(),
            option_a: Some("ရန်ကုန်".to_string()),
            option_b: Some("မန္တလေး".to_string()),
            option_c: Some("နေပြည်တော်".to_string()),
            option_d: Some("ပုဂံ".to_string()),
            category: None,
        }
    }

    #[test]
    fn test_mcq_with_four_options() {
        let prompt = format_question(&example(QuestionType::Mcq));
        assert!(prompt.contains("(က) ရန်ကုန်"));
        assert!(prompt.contains("(ဃ) ပုဂံ"));
        assert!(prompt.contains("က၊ ခ၊ ဂ၊ ဃ"));
        assert!(prompt.contains("မြန်မာနိုင်ငံ၏ မြို့တော်မှာ အဘယ်နည်း။\n\n(က)"));
    }

    #[test]
    fn test_mcq_with_three_options() {
        let mut three = example(QuestionType::Mcq);
        three.option_d = None;
        let prompt = format_question(&three);
        assert!(prompt.contains("(ဂ) နေပြည်တော်"));
        assert!(!prompt.contains("(ဃ)"));
        assert!(prompt.contains("(က၊ ခ၊ ဂ)"));
    }

    #[test]
    fn test_mcq_missing_options_falls_back_to_question() {
        let mut broken = example(QuestionType::Mcq);
        broken.option_b = None;
        assert_eq!(format_question(&broken), "မြန်မာနိုင်ငံ၏ မြို့တော်မှာ အဘယ်နည်း။");
    }

    #[test]
    fn test_true_false_and_fill_in_blank_templates() {
        let tof = format_question(&example(QuestionType::Tof));
        assert!(tof.starts_with("အောက်ပါကို မှားလျှင်"));
        assert!(tof.ends_with("အဘယ်နည်း။"));

        let fib = format_question(&example(QuestionType::Fib));
        assert!(fib.contains("ကွက်လပ်"));
        assert!(!fib.contains("(က)"));
    }

    #[test]
    fn test_placeholder_text_in_question_is_kept_literally() {
        let mut tricky = example(QuestionType::Mcq);
        tricky.question = "{options} နှင့် {letters} ကို ရှင်းပြပါ".to_string();
        let prompt = format_question(&tricky);

        assert!(prompt.contains("{options} နှင့် {letters} ကို ရှင်းပြပါ\n\n(က) ရန်ကုန်"));
        assert_eq!(prompt.matches("(က) ရန်ကုန်").count(), 1);
    }

    #[test]
    fn test_fill_template_leaves_unknown_braces() {
        assert_eq!(fill_template("{a} {b} {", &[("a", "{b}")]), "{b} {b} {");
    }

    #[test]
    fn test_open_question_template() {
        let prompt = format_question(&example(QuestionType::MetaphorQna));
        assert_eq!(prompt, "အောက်ပါတို့ကို ဖြေဆိုပါ\n\nမြန်မာနိုင်ငံ၏ မြို့တော်မှာ အဘယ်နည်း။");
    }
}
