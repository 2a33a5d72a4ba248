/// Legacy environment variable names honored when the primary `TAPESTAGE_*` name is unset.
///
/// Each entry is `(primary_name, alias_name)`.
pub const ENVIRONMENT_NAME_ALIASES: &[(&str, &str)] = &[
    ("TAPESTAGE_CLIENT_CREDENTIAL_PATH", "X509_USER_PROXY"),
    ("TAPESTAGE_CLIENT_CA_DIRECTORY", "X509_CERT_DIR"),
];
