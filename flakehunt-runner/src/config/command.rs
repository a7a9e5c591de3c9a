// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::Deserialize;
use std::fmt;

/// A command to run: the engine or the instrumentation command.
///
/// In configuration, a command is either a Unix shell-style string or a list of arguments.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandSpec {
    /// The program to run.
    pub program: String,

    /// The arguments to pass to the program.
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Creates a new command.
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words = std::iter::once(&self.program).chain(&self.args);
        write!(f, "{}", shell_words::join(words))
    }
}

impl<'de> Deserialize<'de> for CommandSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct CommandVisitor;

        impl<'de> serde::de::Visitor<'de> for CommandVisitor {
            type Value = CommandSpec;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a Unix shell command or a list of arguments")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let mut args = shell_words::split(value).map_err(E::custom)?;
                if args.is_empty() {
                    return Err(E::invalid_value(serde::de::Unexpected::Str(value), &self));
                }
                let program = args.remove(0);
                Ok(CommandSpec { program, args })
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let Some(program) = seq.next_element::<String>()? else {
                    return Err(serde::de::Error::invalid_length(0, &self));
                };
                let mut args = Vec::new();
                while let Some(value) = seq.next_element::<String>()? {
                    args.push(value);
                }
                Ok(CommandSpec { program, args })
            }
        }

        deserializer.deserialize_any(CommandVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::de::IntoDeserializer;
    use test_case::test_case;

    #[test_case("./gradlew test", "./gradlew", &["test"] ; "simple")]
    #[test_case("engine --flag 'quoted arg'", "engine", &["--flag", "quoted arg"] ; "quoted")]
    fn parse_string(input: &str, program: &str, args: &[&str]) {
        let de: serde::de::value::StrDeserializer<'_, serde::de::value::Error> =
            input.into_deserializer();
        let command = CommandSpec::deserialize(de).expect("command parses");
        assert_eq!(command, CommandSpec::new(program, args.iter().copied()));
    }

    #[test]
    fn display_quotes_arguments() {
        let command = CommandSpec::new("engine", ["--flag", "quoted arg"]);
        assert_eq!(command.to_string(), "engine --flag 'quoted arg'");
    }
}
