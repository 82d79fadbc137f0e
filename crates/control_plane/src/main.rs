#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    control_plane_app::init().await
}
