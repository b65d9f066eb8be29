// ABOUTME: Config scaffolding for new projects.
// ABOUTME: Creates a rollout.yml with a static frontend and a PM2 backend target.

use std::path::Path;

use crate::error::{Error, Result};

use super::CONFIG_FILENAME;

pub fn init_config(dir: &Path, force: bool) -> Result<()> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    std::fs::write(&config_path, TEMPLATE)?;
    Ok(())
}

const TEMPLATE: &str = r#"# rollout configuration
#
# Stages per target:
#   backup -> install -> build -> place -> proxy -> restart -> healthcheck

# Commands that need root (proxy config, systemd) are run through this prefix.
privilege:
  escalate: ["sudo", "-n"]

proxy:
  config_dir: /etc/nginx/conf.d
  validate: nginx -t
  reload: nginx -s reload
  variables:
    domain: example.com

supervisor:
  kind: pm2

targets:
  frontend:
    source: frontend
    install:
      - npm ci
      - npm install
    # Tried in order until one exits 0 AND leaves artifact_dir non-empty.
    build:
      - npm run build
      - npx vite build
    artifact_dir: dist
    deploy_path: /var/www/frontend
    proxy_template: nginx/frontend.conf
    healthcheck:
      path: index.html

  backend:
    source: backend
    install:
      - npm ci --omit=dev
    artifact_dir: .
    deploy_path: /srv/backend
    service:
      name: backend
      config: ecosystem.config.js
    healthcheck:
      url: http://127.0.0.1:3000/health
      retries: 5
      interval: 3s
    restart_timeout: 30s

environments:
  staging:
    variables:
      domain: staging.example.com
    targets:
      frontend:
        deploy_path: /var/www/frontend-staging
"#;
