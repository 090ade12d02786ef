// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! NGINX configuration generation and in-container application.
//!
//! The generator produces a deterministic config from a cluster's tunables
//! and routing model. Application is all-or-nothing per container: back up
//! the live file, write the candidate, validate with `nginx -t`, reload,
//! and restore the backup on any failure so no container is ever left
//! running a partially written file.

use std::fmt::Write as _;

use iaas_core::error::{Error, Result};
use iaas_core::model::{NginxRouting, NginxTunables, ServerBlock, Upstream};
use iaas_runtime::ContainerRuntime;

/// Live config path inside an NGINX container.
pub const NGINX_CONF_PATH: &str = "/etc/nginx/nginx.conf";

/// Render an upstream pool.
fn render_upstream(out: &mut String, upstream: &Upstream) {
    let _ = writeln!(out, "    upstream {} {{", upstream.name);
    if let Some(directive) = upstream.algorithm.directive() {
        let _ = writeln!(out, "        {directive};");
    }
    for server in &upstream.servers {
        let mut line = format!(
            "        server {} weight={} max_fails={} fail_timeout={}s",
            server.address, server.weight, server.max_fails, server.fail_timeout_secs
        );
        if server.backup {
            line.push_str(" backup");
        }
        line.push(';');
        let _ = writeln!(out, "{line}");
    }
    let _ = writeln!(out, "    }}");
}

/// Render a virtual server.
fn render_server_block(out: &mut String, block: &ServerBlock) {
    let _ = writeln!(out, "    server {{");
    let _ = writeln!(out, "        listen {};", block.listen);
    let _ = writeln!(out, "        server_name {};", block.server_name);
    for location in &block.locations {
        let target = location
            .upstream
            .as_ref()
            .map(|u| format!("http://{u}"))
            .or_else(|| location.proxy_pass.clone());
        let _ = writeln!(out, "        location {} {{", location.path);
        if let Some(target) = target {
            let _ = writeln!(out, "            proxy_pass {target};");
            let _ = writeln!(out, "            proxy_set_header Host $host;");
            let _ = writeln!(out, "            proxy_set_header X-Real-IP $remote_addr;");
            let _ = writeln!(
                out,
                "            proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;"
            );
        } else {
            let _ = writeln!(out, "            return 404;");
        }
        let _ = writeln!(out, "        }}");
    }
    let _ = writeln!(out, "    }}");
}

/// Produce a deterministic nginx config from tunables and routing.
pub fn default_config(tunables: &NginxTunables, routing: &NginxRouting) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "user  nginx;");
    let _ = writeln!(out, "worker_processes  {};", tunables.worker_processes);
    let _ = writeln!(out);
    let _ = writeln!(out, "error_log  /var/log/nginx/error.log notice;");
    let _ = writeln!(out, "pid        /var/run/nginx.pid;");
    let _ = writeln!(out);
    let _ = writeln!(out, "events {{");
    let _ = writeln!(out, "    worker_connections  {};", tunables.worker_connections);
    let _ = writeln!(out, "}}");
    let _ = writeln!(out);
    let _ = writeln!(out, "http {{");
    let _ = writeln!(out, "    include       /etc/nginx/mime.types;");
    let _ = writeln!(out, "    default_type  application/octet-stream;");
    let _ = writeln!(out, "    sendfile      on;");
    let _ = writeln!(out, "    keepalive_timeout  {};", tunables.keepalive_timeout);
    if tunables.gzip {
        let _ = writeln!(out, "    gzip  on;");
        let _ = writeln!(
            out,
            "    gzip_types  text/plain text/css application/json application/javascript;"
        );
    }
    if let Some(rate) = tunables.rate_limit_per_second {
        let _ = writeln!(
            out,
            "    limit_req_zone  $binary_remote_addr zone=iaas_rl:10m rate={rate}r/s;"
        );
    }
    let _ = writeln!(
        out,
        "    proxy_cache_path  /var/cache/nginx levels=1:2 keys_zone=iaas_cache:10m max_size=1g inactive=60m use_temp_path=off;"
    );
    let _ = writeln!(out, "    ssl_protocols  {};", tunables.ssl_protocols);
    let _ = writeln!(out);

    for upstream in &routing.upstreams {
        render_upstream(&mut out, upstream);
        let _ = writeln!(out);
    }
    for block in &routing.server_blocks {
        render_server_block(&mut out, block);
        let _ = writeln!(out);
    }

    // Default server: health probe plus stub status for private subnets.
    let _ = writeln!(out, "    server {{");
    let _ = writeln!(out, "        listen 80 default_server;");
    let _ = writeln!(out, "        server_name _;");
    let _ = writeln!(out);
    let _ = writeln!(out, "        location /health {{");
    let _ = writeln!(out, "            default_type application/json;");
    let _ = writeln!(out, "            return 200 '{{\"status\":\"ok\"}}';");
    let _ = writeln!(out, "        }}");
    let _ = writeln!(out);
    let _ = writeln!(out, "        location /stub_status {{");
    let _ = writeln!(out, "            stub_status;");
    let _ = writeln!(out, "            allow 10.0.0.0/8;");
    let _ = writeln!(out, "            allow 172.16.0.0/12;");
    let _ = writeln!(out, "            allow 192.168.0.0/16;");
    let _ = writeln!(out, "            deny all;");
    let _ = writeln!(out, "        }}");
    let _ = writeln!(out, "    }}");
    let _ = writeln!(out, "}}");

    out
}

/// Validate a candidate config on a container without touching the live file.
///
/// The candidate is written to a scratch path and checked with
/// `nginx -t -c`. A non-zero exit surfaces as precondition-failed.
pub async fn validate_on(
    runtime: &dyn ContainerRuntime,
    container_id: &str,
    config: &str,
    epoch: i64,
) -> Result<()> {
    let scratch = format!("/tmp/nginx-candidate-{epoch}.conf");
    let write = format!("cat > {scratch} << 'IAAS_EOF'\n{config}\nIAAS_EOF");
    let result = runtime.exec_command(container_id, &["sh", "-c", &write]).await?;
    if !result.success() {
        return Err(Error::DependencyFailed(format!(
            "failed to stage candidate config: {}",
            result.output
        )));
    }

    let check = runtime
        .exec_command(container_id, &["nginx", "-t", "-c", &scratch])
        .await?;
    if !check.success() {
        return Err(Error::PreconditionFailed(format!(
            "config validation failed: {}",
            check.output.trim()
        )));
    }
    Ok(())
}

/// Apply a config to one container with backup and rollback.
///
/// On validation failure the backup is restored; on reload failure the
/// backup is restored and a reload is issued again so the container keeps
/// serving its previous config.
pub async fn apply_to_container(
    runtime: &dyn ContainerRuntime,
    container_id: &str,
    config: &str,
    epoch: i64,
) -> Result<()> {
    let backup = format!("{NGINX_CONF_PATH}.backup.{epoch}");

    let copy = format!("cp {NGINX_CONF_PATH} {backup}");
    let result = runtime.exec_command(container_id, &["sh", "-c", &copy]).await?;
    if !result.success() {
        return Err(Error::DependencyFailed(format!(
            "failed to back up live config: {}",
            result.output
        )));
    }

    let write = format!("cat > {NGINX_CONF_PATH} << 'IAAS_EOF'\n{config}\nIAAS_EOF");
    let result = runtime.exec_command(container_id, &["sh", "-c", &write]).await?;
    if !result.success() {
        restore(runtime, container_id, &backup).await;
        return Err(Error::DependencyFailed(format!(
            "failed to write config: {}",
            result.output
        )));
    }

    let check = runtime.exec_command(container_id, &["nginx", "-t"]).await?;
    if !check.success() {
        restore(runtime, container_id, &backup).await;
        return Err(Error::PreconditionFailed(format!(
            "config validation failed: {}",
            check.output.trim()
        )));
    }

    let reload = runtime
        .exec_command(container_id, &["nginx", "-s", "reload"])
        .await?;
    if !reload.success() {
        restore(runtime, container_id, &backup).await;
        let _ = runtime
            .exec_command(container_id, &["nginx", "-s", "reload"])
            .await;
        return Err(Error::DependencyFailed(format!(
            "reload failed: {}",
            reload.output.trim()
        )));
    }

    Ok(())
}

async fn restore(runtime: &dyn ContainerRuntime, container_id: &str, backup: &str) {
    let restore = format!("cp {backup} {NGINX_CONF_PATH}");
    if let Err(e) = runtime
        .exec_command(container_id, &["sh", "-c", &restore])
        .await
    {
        tracing::error!(container_id, error = %e, "failed to restore nginx config backup");
    }
}
