use super::*;

fn counter() -> TokenCounter {
    TokenCounter::for_model("gpt-3.5-turbo").expect("tokenizer should load")
}

#[test]
fn empty_text_has_no_tokens() {
    assert_eq!(counter().count(""), 0);
}

#[test]
fn counting_is_deterministic() {
    let counter = counter();
    let text = "How do I declare an @action in Codon?";
    assert_eq!(counter.count(text), counter.count(text));
    assert!(counter.count(text) > 0);
}

#[test]
fn concatenation_never_lowers_the_count() {
    let counter = counter();
    let parts = ["hello", " world", "\n###\n", "日本語のテキスト", " Answer:"];

    let mut text = String::new();
    let mut previous = 0;
    for part in parts {
        text.push_str(part);
        let count = counter.count(&text);
        assert!(count >= previous);
        previous = count;
    }
}

#[test]
fn unknown_model_falls_back() {
    let counter = TokenCounter::for_model("not-a-real-model").expect("fallback should load");
    assert!(counter.count("fallback tokenizer") > 0);
}
