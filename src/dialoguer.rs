use std::fmt;

use dialoguer::{console::Term, theme::ColorfulTheme, Input, Password, Select};
use error_stack::{IntoReport, ResultExt};

#[derive(Debug)]
pub struct DialoguerError;

impl fmt::Display for DialoguerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Dialoguer error")
    }
}

impl std::error::Error for DialoguerError {}

pub type DialoguerResult<T> = error_stack::Result<T, DialoguerError>;

#[derive(Debug, Clone)]
pub struct Dialoguer;

impl Dialoguer {
    pub fn select_yes_or_no(prompt_text: String) -> DialoguerResult<bool> {
        let colorful_theme = &ColorfulTheme::default();
        let mut select = Select::with_theme(colorful_theme);
        let dialog = select
            .with_prompt(&prompt_text)
            .item("yes")
            .item("no")
            .default(0);
        let opt = dialog
            .interact_on_opt(&Term::stderr())
            .into_report()
            .change_context(DialoguerError)?
            .ok_or(DialoguerError)
            .into_report()?;

        Ok(opt == 0)
    }

    pub fn input(prompt_text: String) -> DialoguerResult<String> {
        let colorful_theme = &ColorfulTheme::default();
        let mut input = Input::with_theme(colorful_theme);
        let dialog: String = input
            .with_prompt(&prompt_text)
            .interact_text()
            .into_report()
            .change_context(DialoguerError)?;

        Ok(dialog.trim().to_string())
    }

    /// Hidden input, used for the client secret.
    pub fn password(prompt_text: String) -> DialoguerResult<String> {
        let colorful_theme = &ColorfulTheme::default();
        let mut input = Password::with_theme(colorful_theme);
        let dialog: String = input
            .with_prompt(&prompt_text)
            .interact()
            .into_report()
            .change_context(DialoguerError)?;

        Ok(dialog.trim().to_string())
    }
}
