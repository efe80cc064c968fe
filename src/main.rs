use kms_core::prelude::*;

fn main() -> KmsResult<()> {
    println!("Testing KMS core engine...");

    let config = match EngineConfig::from_env_if_present()? {
        Some(config) => config,
        None => {
            println!("KMS_MASTER_KEY / KMS_AUDIT_SECRET not set, using throwaway demo secrets");
            let master = kms_core::utils::random_bytes(32);
            let audit = kms_core::utils::random_bytes(32);
            EngineConfig::new(&master, &audit)?
        }
    };

    let kms = Kms::in_memory(config)?;
    let ctx = OperationContext::new("demo").with_source_address("127.0.0.1");

    run_rotation_scenario(&kms, &ctx)?;
    run_signature_scenario(&kms, &ctx)?;
    run_audit_report(&kms, &ctx)?;

    Ok(())
}

fn run_rotation_scenario(kms: &Kms, ctx: &OperationContext) -> KmsResult<()> {
    println!("\n=== Rotation and revocation ===");

    let key = kms.create_key(ctx, "payments", "AES256GCM")?;
    println!("Created key {} ({})", key.id, key.algorithm);

    let hello = kms.encrypt(ctx, &key.id, b"hello")?;
    println!("Encrypted 'hello' under version {}", hello.key_version);

    let rotated = kms.rotate_key(ctx, &key.id)?;
    println!("Rotated to version {}", rotated.current_version);

    let world = kms.encrypt(ctx, &key.id, b"world")?;
    println!("Encrypted 'world' under version {}", world.key_version);

    for envelope in [&hello, &world] {
        let plaintext = kms.decrypt(ctx, envelope)?;
        println!(
            "✓ Decrypted version {} envelope: {}",
            envelope.key_version,
            String::from_utf8_lossy(&plaintext)
        );
    }

    kms.revoke_key(ctx, &key.id)?;
    match kms.encrypt(ctx, &key.id, b"more") {
        Err(e) => println!("✓ Encryption after revoke refused: {}", e),
        Ok(_) => println!("✗ Encryption after revoke unexpectedly succeeded"),
    }

    let plaintext = kms.decrypt(ctx, &hello)?;
    println!(
        "✓ Pre-revocation envelope still decrypts: {}",
        String::from_utf8_lossy(&plaintext)
    );
    println!("Envelope wire format: {}", hello.to_json()?);

    Ok(())
}

fn run_signature_scenario(kms: &Kms, ctx: &OperationContext) -> KmsResult<()> {
    println!("\n=== Signatures ===");

    let key = kms.create_key(ctx, "release-signing", "Ed25519")?;
    let signed = kms.encrypt(ctx, &key.id, b"release v1.0")?;
    println!(
        "Signed message with {} ({} byte signature)",
        key.algorithm,
        signed.signature.as_ref().map(|s| s.len()).unwrap_or(0)
    );

    let mut forged = signed.clone();
    forged.ciphertext = b"release v6.6".to_vec();
    match kms.decrypt(ctx, &forged) {
        Err(e) => println!("✓ Forged message rejected: {}", e.user_friendly_message()),
        Ok(_) => println!("✗ Forged message accepted"),
    }

    Ok(())
}

fn run_audit_report(kms: &Kms, ctx: &OperationContext) -> KmsResult<()> {
    println!("\n=== Audit chain ===");

    let summary = kms.audit_summary(ctx)?;
    println!("Recorded {} events", summary.total_events);
    for (status, count) in &summary.by_status {
        println!("  {}: {}", status, count);
    }

    let verification = kms.verify_audit_chain(ctx)?;
    if verification.is_valid() {
        println!("✓ Audit chain intact ({} events verified)", verification.events_verified);
    } else {
        println!(
            "✗ Audit chain tampered at event {:?}",
            verification.first_tampered
        );
    }

    Ok(())
}
