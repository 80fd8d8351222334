//! Property tests for credential and statement generation

use dynacred::credentials::{
    CredentialGenerator, PasswordCase, PasswordPolicy, PatternCredentialGenerator,
    TemplateCredentialGenerator, USERNAME_LENGTH,
};
use dynacred::error::LifecycleError;
use dynacred::statements::{parse_statements, StatementBindings};
use dynacred::template::{UsernameMetadata, DEFAULT_USERNAME_TEMPLATE};
use proptest::prelude::*;

fn case_strategy() -> impl Strategy<Value = PasswordCase> {
    prop_oneof![Just(PasswordCase::Upper), Just(PasswordCase::Lower)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn password_matches_policy(length in 8usize..=30, case in case_strategy()) {
        let password = PasswordPolicy::new(length, case).generate().unwrap();

        prop_assert_eq!(password.len(), length);
        prop_assert!(password.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        let first = password.chars().next().unwrap();
        match case {
            PasswordCase::Upper => prop_assert!(first.is_ascii_uppercase()),
            PasswordCase::Lower => prop_assert!(first.is_ascii_lowercase()),
        }
    }

    #[test]
    fn default_template_usernames_fit(
        display in "[a-zA-Z0-9.-]{0,24}",
        role in "[a-zA-Z0-9.-]{0,24}",
    ) {
        let generator = TemplateCredentialGenerator::from_source(
            DEFAULT_USERNAME_TEMPLATE,
            PasswordPolicy::default(),
        )
        .unwrap();
        let username = generator
            .generate_username(&UsernameMetadata::new(display, role))
            .unwrap();

        prop_assert_eq!(username.len(), USERNAME_LENGTH);
        prop_assert!(username.starts_with("V_"));
        prop_assert!(username
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'));
    }

    #[test]
    fn pattern_usernames_fit(display in ".{0,40}", role in ".{0,40}") {
        let metadata = UsernameMetadata::new(display, role);

        let role_aware = PatternCredentialGenerator::new(PasswordPolicy::default())
            .generate_username(&metadata)
            .unwrap();
        prop_assert_eq!(role_aware.len(), USERNAME_LENGTH);
        prop_assert!(role_aware.starts_with("v_"));

        let display_only = PatternCredentialGenerator::display_only(PasswordPolicy::default())
            .generate_username(&metadata)
            .unwrap();
        prop_assert_eq!(display_only.len(), USERNAME_LENGTH);
        prop_assert!(display_only.starts_with(|c: char| c.is_ascii_lowercase()));
        prop_assert!(display_only
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
    }

    #[test]
    fn template_usernames_never_carry_dollar_or_hash(
        display in "[a-zA-Z0-9$#._-]{0,24}",
        role in "[a-zA-Z0-9$#._-]{0,24}",
    ) {
        let generator = TemplateCredentialGenerator::from_source(
            DEFAULT_USERNAME_TEMPLATE,
            PasswordPolicy::default(),
        )
        .unwrap();

        match generator.generate_username(&UsernameMetadata::new(display, role)) {
            Ok(username) => {
                prop_assert_eq!(username.len(), USERNAME_LENGTH);
                prop_assert!(username.starts_with(|c: char| c.is_ascii_alphabetic()));
                prop_assert!(username
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'));
            }
            Err(e) => {
                let is_generation = matches!(e, LifecycleError::Generation { .. });
                prop_assert!(is_generation);
            }
        }
    }

    #[test]
    fn parsed_statements_are_trimmed_and_non_empty(
        raw in prop::collection::vec("[a-z ;]{0,30}", 0..5),
        split in any::<bool>(),
    ) {
        let statements = parse_statements(&raw, split);
        for statement in &statements {
            prop_assert!(!statement.is_empty());
            prop_assert_eq!(statement.trim(), statement.as_str());
            if split {
                prop_assert!(!statement.contains(';'));
            }
        }
        prop_assert_eq!(parse_statements(&statements, split), statements);
    }

    #[test]
    fn bound_values_are_not_rescanned(password in "[A-Za-z0-9_{}]{1,20}") {
        let rendered = StatementBindings::new()
            .username("V_APP")
            .password(password.clone())
            .render("ALTER USER {{username}} IDENTIFIED BY \"{{password}}\"");
        prop_assert_eq!(
            rendered,
            format!("ALTER USER V_APP IDENTIFIED BY \"{}\"", password)
        );
    }
}
