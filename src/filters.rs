//! Filters available to every template, plus the adapters that turn
//! declared filter and test expressions into engine callables.

use minijinja::value::{Kwargs, Rest, Value};
use minijinja::{context, Environment, Error, ErrorKind};
use std::process::{Command, Output};

/// Registers `env`, `shell` and `subprocess`.
pub fn register_builtin_filters(env: &mut Environment<'static>) {
    env.add_filter("env", env_filter);
    env.add_filter("shell", shell);
    env.add_filter("subprocess", subprocess);
}

/// `{{ 'HOME' | env }}` or `{{ 'DB_URL' | env('postgres://localhost') }}`
pub fn env_filter(name: String, default: Option<String>) -> String {
    std::env::var(&name).ok().or(default).unwrap_or_default()
}

fn run(command: &str) -> Result<Output, Error> {
    Command::new("sh").arg("-c").arg(command).output().map_err(|e| {
        Error::new(ErrorKind::InvalidOperation, format!("unable to run '{command}': {e}"))
    })
}

fn failure(command: &str, output: &Output) -> Error {
    let stderr = String::from_utf8_lossy(&output.stderr);
    Error::new(
        ErrorKind::InvalidOperation,
        format!("'{command}' failed with {}: {}", output.status, stderr.trim()),
    )
}

/// Runs `command` through `sh -c` and returns its stdout without the
/// trailing newline.
pub fn shell(command: String) -> Result<String, Error> {
    let output = run(&command)?;
    if !output.status.success() {
        return Err(failure(&command, &output));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.trim_end_matches(['\r', '\n']).to_string())
}

/// Runs `command` and returns `{returncode, stdout, stderr}`. Unless called
/// with `check=false`, a non-zero exit status fails the render.
pub fn subprocess(command: String, kwargs: Kwargs) -> Result<Value, Error> {
    let check: Option<bool> = kwargs.get("check")?;
    kwargs.assert_all_used()?;
    let output = run(&command)?;
    if check.unwrap_or(true) && !output.status.success() {
        return Err(failure(&command, &output));
    }
    Ok(context! {
        returncode => output.status.code().unwrap_or(-1),
        stdout => String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr => String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Evaluates a declared expression with `value` and `args` bound.
pub fn eval_declaration(body: &str, value: Value, args: Vec<Value>) -> Result<Value, Error> {
    let env = Environment::new();
    let expression = env.compile_expression(body)?;
    expression.eval(context! { value => value, args => args })
}

/// Registers a filter whose body is a template expression.
pub fn add_declared_filter(env: &mut Environment<'static>, name: String, body: String) {
    env.add_filter(name, move |value: Value, args: Rest<Value>| {
        eval_declaration(&body, value, args.0)
    });
}

/// Registers a test whose result is the truthiness of a template expression.
pub fn add_declared_test(env: &mut Environment<'static>, name: String, body: String) {
    env.add_test(name, move |value: Value, args: Rest<Value>| -> Result<bool, Error> {
        Ok(eval_declaration(&body, value, args.0)?.is_true())
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_default() {
        let value = env_filter("KILN_SURELY_UNSET_VARIABLE".into(), Some("fallback".into()));
        assert_eq!(value, "fallback");
        assert_eq!(env_filter("KILN_SURELY_UNSET_VARIABLE".into(), None), "");
    }

    #[test]
    fn test_shell() {
        assert_eq!(shell("echo hello".into()).unwrap(), "hello");
        assert!(shell("exit 3".into()).is_err());
    }

    #[test]
    fn test_declared_filter_and_test() {
        let mut env = Environment::new();
        add_declared_filter(&mut env, "shout".into(), "value | upper".into());
        add_declared_test(&mut env, "divisiblebythree".into(), "value % 3 == 0".into());
        let rendered = env
            .render_str("{{ 'bar' | shout }} {{ 9 is divisiblebythree }} {{ 4 is divisiblebythree }}", ())
            .unwrap();
        assert_eq!(rendered, "BAR true false");
    }

    #[test]
    fn test_declared_filter_arguments() {
        let mut env = Environment::new();
        add_declared_filter(&mut env, "swap".into(), "value | replace(args[0], args[1])".into());
        let rendered = env.render_str("{{ 'a-b' | swap('-', '+') }}", ()).unwrap();
        assert_eq!(rendered, "a+b");
    }
}
