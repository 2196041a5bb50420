pub mod accounts;
pub mod aml;
pub mod auth;
pub mod customers;
pub mod sepa;
pub mod swift;
pub mod transfers;
