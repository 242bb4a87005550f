//! One validation function per submitted form. Each returns the typed,
//! normalised value or every field error found.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::*;
use crate::core::errors::FieldError;
use crate::core::helpers::sanitize_text;
use crate::core::query_params::get_bool_flag;

pub type FormResult<T> = Result<T, Vec<FieldError>>;

#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Login {
    pub username: String,
    pub password: String,
    pub remember_me: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileEdit {
    pub username: String,
    pub bio: Option<String>,
}

fn email_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("Regex should compile"))
}

fn username_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("Regex should compile"))
}

fn field<'a>(fields: &'a HashMap<String, String>, name: &str) -> &'a str {
    fields.get(name).map(|s| s.as_str()).unwrap_or_default()
}

fn finish<T>(errors: Vec<FieldError>, value: T) -> FormResult<T> {
    if errors.is_empty() {
        Ok(value)
    } else {
        Err(errors)
    }
}

pub fn check_username(username: &str, errors: &mut Vec<FieldError>) {
    let len = username.chars().count();
    if username.is_empty() {
        errors.push(FieldError::new("username", "Username is required"));
    } else if !(MIN_USERNAME_LENGTH..=MAX_USERNAME_LENGTH).contains(&len) {
        errors.push(FieldError::new(
            "username",
            format!(
                "Username must be {}-{} characters",
                MIN_USERNAME_LENGTH, MAX_USERNAME_LENGTH
            ),
        ));
    } else if !username_regex().is_match(username) {
        errors.push(FieldError::new(
            "username",
            "Username may only contain letters, digits, '.', '-' and '_'",
        ));
    }
}

fn check_new_password(password: &str, repeat: &str, errors: &mut Vec<FieldError>) {
    if password.is_empty() {
        errors.push(FieldError::new("password", "Password is required"));
    } else if password.chars().count() < MIN_PASSWORD_LENGTH {
        errors.push(FieldError::new(
            "password",
            format!("Password must be at least {} characters", MIN_PASSWORD_LENGTH),
        ));
    }
    if password != repeat {
        errors.push(FieldError::new("repeat_password", "Passwords must match"));
    }
}

/// Emails are compared case-insensitively, so they are stored lowercased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn check_email(email: &str, errors: &mut Vec<FieldError>) {
    if email.is_empty() {
        errors.push(FieldError::new("email", "Email is required"));
    } else if email.len() > MAX_EMAIL_LENGTH || !email_regex().is_match(email) {
        errors.push(FieldError::new("email", "Invalid email address"));
    }
}

pub fn validate_registration(fields: &HashMap<String, String>) -> FormResult<Registration> {
    let mut errors = Vec::new();
    let username = field(fields, "username").trim().to_string();
    let email = normalize_email(field(fields, "email"));
    let password = field(fields, "password").to_string();

    check_username(&username, &mut errors);
    check_email(&email, &mut errors);
    check_new_password(&password, field(fields, "repeat_password"), &mut errors);

    finish(errors, Registration { username, email, password })
}

pub fn validate_login(fields: &HashMap<String, String>) -> FormResult<Login> {
    let mut errors = Vec::new();
    let username = field(fields, "username").trim().to_string();
    let password = field(fields, "password").to_string();

    if username.is_empty() {
        errors.push(FieldError::new("username", "Username is required"));
    }
    if password.is_empty() {
        errors.push(FieldError::new("password", "Password is required"));
    }

    let remember_me = get_bool_flag(fields, "remember_me");
    finish(errors, Login { username, password, remember_me })
}

pub fn validate_forgot_password(fields: &HashMap<String, String>) -> FormResult<String> {
    let mut errors = Vec::new();
    let email = normalize_email(field(fields, "email"));
    check_email(&email, &mut errors);
    finish(errors, email)
}

pub fn validate_reset_password(fields: &HashMap<String, String>) -> FormResult<String> {
    let mut errors = Vec::new();
    let password = field(fields, "password").to_string();
    check_new_password(&password, field(fields, "password2"), &mut errors);
    finish(errors, password)
}

pub fn validate_profile(fields: &HashMap<String, String>) -> FormResult<ProfileEdit> {
    let mut errors = Vec::new();
    let username = field(fields, "username").trim().to_string();
    check_username(&username, &mut errors);

    let bio = sanitize_text(field(fields, "bio").trim());
    if bio.chars().count() > MAX_BIO_LENGTH {
        errors.push(FieldError::new(
            "bio",
            format!("Bio too long (max {} chars)", MAX_BIO_LENGTH),
        ));
    }
    let bio = if bio.is_empty() { None } else { Some(bio) };

    finish(errors, ProfileEdit { username, bio })
}

pub fn validate_post(fields: &HashMap<String, String>) -> FormResult<String> {
    let body = sanitize_text(field(fields, "post").trim());
    let len = body.chars().count();
    if len == 0 {
        return Err(vec![FieldError::new("post", "Say something")]);
    }
    if len > MAX_POST_LENGTH {
        return Err(vec![FieldError::new(
            "post",
            format!("Posts are limited to {} characters", MAX_POST_LENGTH),
        )]);
    }
    Ok(body)
}
