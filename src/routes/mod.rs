/// Router Module Index
///
/// Splits the HTTP surface by audience. Every router here sits behind the
/// route interceptor, which decides who reaches which path; handlers then
/// check the individual permission they need.

/// Landing page and the auth endpoints. Reachable without a session.
pub mod public;

/// Dashboards and the pages of the general, donor, recipient and blood bank zones.
pub mod authenticated;

/// Nested under `/admin`. The interceptor keeps every other role out.
pub mod admin;
