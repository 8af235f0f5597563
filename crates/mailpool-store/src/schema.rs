//! PostgreSQL schema for the mailpool store.
//!
//! Applied idempotently at startup by [`crate::PgStore::migrate`]. The
//! unique constraints here are load-bearing: `exclusive_purchases.account_id`
//! is the last guard against double-sale, `(family_group_id, user_id)`
//! against duplicate binds, and `payments.order_no` / `license_keys.key_code`
//! against generator collisions.

/// Idempotent DDL for all mailpool tables.
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS accounts (
    id          BIGSERIAL PRIMARY KEY,
    type        TEXT NOT NULL,
    email       TEXT NOT NULL UNIQUE,
    password    TEXT NOT NULL,
    totp_secret TEXT,
    status      TEXT NOT NULL DEFAULT 'available',
    source      TEXT NOT NULL DEFAULT '',
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS temporary_usages (
    id          BIGSERIAL PRIMARY KEY,
    account_id  BIGINT NOT NULL REFERENCES accounts(id),
    user_id     BIGINT NOT NULL,
    started_at  TIMESTAMPTZ NOT NULL,
    expires_at  TIMESTAMPTZ NOT NULL,
    returned_at TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_temporary_usages_open
    ON temporary_usages (account_id, user_id)
    WHERE returned_at IS NULL;

CREATE TABLE IF NOT EXISTS exclusive_purchases (
    id           BIGSERIAL PRIMARY KEY,
    account_id   BIGINT NOT NULL UNIQUE REFERENCES accounts(id),
    user_id      BIGINT NOT NULL,
    payment_id   BIGINT,
    purchased_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS family_groups (
    id         BIGSERIAL PRIMARY KEY,
    account_id BIGINT NOT NULL UNIQUE REFERENCES accounts(id),
    capacity   INT NOT NULL DEFAULT 5
);

CREATE TABLE IF NOT EXISTS family_bindings (
    id                  BIGSERIAL PRIMARY KEY,
    family_group_id     BIGINT NOT NULL REFERENCES family_groups(id),
    user_id             BIGINT NOT NULL,
    member_email        TEXT NOT NULL,
    member_password_enc TEXT NOT NULL,
    bound_at            TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (family_group_id, user_id)
);

CREATE TABLE IF NOT EXISTS payments (
    id             BIGSERIAL PRIMARY KEY,
    order_no       TEXT NOT NULL UNIQUE,
    user_id        BIGINT NOT NULL,
    amount_cents   BIGINT NOT NULL,
    product_type   TEXT NOT NULL,
    quota_amount   BIGINT NOT NULL,
    status         TEXT NOT NULL DEFAULT 'pending',
    payment_method TEXT,
    transaction_id TEXT,
    paid_at        TIMESTAMPTZ,
    expired_at     TIMESTAMPTZ NOT NULL,
    created_at     TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS license_keys (
    id           BIGSERIAL PRIMARY KEY,
    key_code     TEXT NOT NULL UNIQUE,
    user_id      BIGINT NOT NULL,
    payment_id   BIGINT NOT NULL REFERENCES payments(id),
    product_type TEXT NOT NULL,
    quota_total  BIGINT NOT NULL,
    quota_used   BIGINT NOT NULL DEFAULT 0,
    status       TEXT NOT NULL DEFAULT 'active',
    activated_at TIMESTAMPTZ,
    created_at   TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS subscriptions (
    id         BIGSERIAL PRIMARY KEY,
    user_id    BIGINT NOT NULL,
    plan       TEXT NOT NULL,
    expires_at TIMESTAMPTZ NOT NULL,
    status     TEXT NOT NULL DEFAULT 'active'
);

CREATE INDEX IF NOT EXISTS idx_subscriptions_user
    ON subscriptions (user_id, expires_at DESC);
";
