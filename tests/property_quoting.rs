use proptest::prelude::*;
use teeproc::exec::prompt::{quote, render, shellify};

proptest! {
    #[test]
    fn quoted_tokens_split_back_unchanged(tokens in prop::collection::vec("[^\u{0}]{0,16}", 1..6)) {
        let line = quote(&tokens);
        let split = shlex::split(&line).expect("quoted line is splittable");
        prop_assert_eq!(split, tokens);
    }

    #[test]
    fn rendered_prompt_is_one_prompt_per_line(
        lines in prop::collection::vec("[a-z$|&;][a-z $|&;]{0,11}", 1..5),
    ) {
        let command = lines.join("\n");
        let rendered = render(&command, "$ ", "> ");

        prop_assert!(rendered.ends_with('\n'));
        prop_assert!(rendered.starts_with("$ "));
        let rendered_lines: Vec<&str> = rendered.lines().collect();
        prop_assert_eq!(rendered_lines.len(), lines.len());
        for (i, (out, line)) in rendered_lines.iter().zip(&lines).enumerate() {
            let prefix = if i == 0 { "$ " } else { "> " };
            prop_assert_eq!(*out, format!("{prefix}{line}"));
        }
    }

    #[test]
    fn shellify_only_appends(command in "[a-z ]{1,20}", merge: bool, comment in proptest::option::of("[a-z=0-9]{1,8}")) {
        let line = shellify(&command, merge, comment.as_deref());
        prop_assert!(line.starts_with(&command));
        prop_assert_eq!(line.contains(" 2>&1"), merge);
        prop_assert_eq!(line.contains(" # "), comment.is_some());
    }
}
